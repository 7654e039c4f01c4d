//! End-to-end scenarios exercising the whole fabric through the manager.

mod common;

use serde_json::{json, Map, Value};

use memstrata::{Payload, Tier};

fn map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// Red-hot kNN: an exact match comes back first with near-zero distance and
/// its metadata intact.
#[tokio::test]
async fn red_hot_knn_exact_match() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 128).await;

    let mut vector = vec![0.0f32; 128];
    vector[0] = 1.0;
    manager
        .red_hot()
        .store("a", &vector, Some(map(json!({"src": "t"}))), None)
        .await
        .unwrap();

    let hits = manager.red_hot().retrieve(&vector, 1, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key, "a");
    assert!(hits[0].distance < 1e-5);
    assert_eq!(hits[0].metadata["src"], json!("t"));

    manager.cleanup().await.unwrap();
}

/// Warm tag retrieval returns rows newest-first.
#[tokio::test]
async fn warm_tag_retrieval_ordering() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;

    for i in 1..=3 {
        manager
            .warm()
            .store(
                Payload::Map(map(json!({"id": i}))),
                None,
                Some(vec!["T".into()]),
                None,
            )
            .await
            .unwrap();
    }

    let tags = vec!["T".to_string()];
    let records = manager
        .warm()
        .retrieve(Some(&tags), None, None)
        .await
        .unwrap();
    let ids: Vec<i64> = records
        .iter()
        .map(|r| r.data["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 2, 1]);

    manager.cleanup().await.unwrap();
}

/// Cold external registration: the file is listed exactly once and its
/// schema is described from the footer without loading rows.
#[tokio::test]
async fn cold_register_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;

    let parquet_path = dir.path().join("f.parquet");
    common::write_parquet(&parquet_path);

    let data_id = manager
        .cold()
        .register_external_file(&parquet_path)
        .await
        .unwrap();

    let files = manager.cold().list_registered_files().await.unwrap();
    let matching: Vec<_> = files
        .iter()
        .filter(|f| f.file_path.canonicalize().unwrap() == parquet_path.canonicalize().unwrap())
        .collect();
    assert_eq!(matching.len(), 1);

    let schema = manager.cold().get_schema(&data_id).await.unwrap().unwrap();
    assert_eq!(schema.fields, vec!["name", "height"]);
    assert_eq!(schema.dtypes["height"], "double");

    manager.cleanup().await.unwrap();
}

/// Glacier round trip: structured values survive as JSON and listing shows
/// the object with its metadata.
#[tokio::test]
async fn glacier_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;

    let payload = map(json!({"k": "v"}));
    let key = manager
        .glacier()
        .store(
            Payload::Map(payload.clone()),
            Some(map(json!({"t": 1}))),
            Some("obj"),
        )
        .await
        .unwrap();

    let value = manager
        .glacier()
        .retrieve(&key, Some("obj"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.as_json(), Some(&Value::Object(payload)));

    let objects = manager.glacier().list_objects("", None).await.unwrap();
    let listed = objects.iter().find(|o| o.key == key).unwrap();
    assert!(listed.size > 0);
    assert_eq!(listed.user_metadata["t"], json!(1));

    manager.cleanup().await.unwrap();
}

/// Prioritised search stops at the warmest tier that satisfies the
/// threshold; colder tiers with matching schemas are never consulted.
#[tokio::test]
async fn prioritized_search_skips_colder_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;
    let store = manager.memory_store();

    // A red-hot vector whose metadata fields describe buildings.
    store
        .store_in(
            Tier::RedHot,
            Payload::Array(vec![0.5; 8]),
            Some(json!({"building": "tower", "height": 120})),
            None,
        )
        .await
        .unwrap();

    // A cold frame with the same vocabulary.
    store
        .store_in(
            Tier::Cold,
            Payload::Map(map(json!({"building": ["tower"], "height": [120]}))),
            None,
            None,
        )
        .await
        .unwrap();

    let search = manager.prioritized_search(0.5);
    let outcome = search
        .search("building height vector", None, 5)
        .await
        .unwrap()
        .expect("a tier should match");

    assert_eq!(outcome.tier, Tier::RedHot);
    assert!(!outcome.hits.is_empty());
    assert!(outcome.hits.iter().all(|h| h.tier == Tier::RedHot));
    // Hits within the tier are sorted by ascending distance.
    for pair in outcome.hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }

    let enhanced = search.get_enhanced_metadata(&outcome.hits).await;
    assert_eq!(enhanced.len(), outcome.hits.len());
    let caps = enhanced[0].query_capabilities.as_ref().unwrap();
    assert!(caps.supports_filtering);

    manager.cleanup().await.unwrap();
}

/// With a threshold of 1.0 only exact-distance-zero hits qualify.
#[tokio::test]
async fn prioritized_search_threshold_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;

    manager
        .memory_store()
        .store_in(
            Tier::RedHot,
            Payload::Array(vec![0.25; 8]),
            Some(json!({"reading": 1})),
            None,
        )
        .await
        .unwrap();

    let strict = manager.prioritized_search(1.0);
    // The exact embedding text of the stored schema matches at distance 0.
    let outcome = strict
        .search("reading type:vector source:vector", None, 5)
        .await
        .unwrap();
    assert!(outcome.is_some());

    let miss = strict.search("completely unrelated topic", None, 5).await.unwrap();
    assert!(miss.is_none());

    manager.cleanup().await.unwrap();
}

/// Glacier → cold promotion of JSON bytes lands as a proper frame and the
/// catalog records the provenance.
#[tokio::test]
async fn glacier_to_cold_promotion_of_json_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;

    let key = manager
        .glacier()
        .store(
            Payload::Bytes(br#"[{"a":1},{"a":2}]"#.to_vec()),
            None,
            Some("obj"),
        )
        .await
        .unwrap();

    let data_id = manager
        .tiering()
        .glacier_to_cold(&key, Some("obj"))
        .await
        .unwrap();

    let record = manager.cold().retrieve(&data_id).await.unwrap().unwrap();
    assert_eq!(record.data.columns(), ["a"]);
    assert_eq!(record.data.column("a").unwrap(), &[json!(1), json!(2)]);

    let entry = manager.catalog().get(&data_id).await.unwrap().unwrap();
    assert_eq!(entry.data_type, "dataframe");
    assert_eq!(entry.additional_meta["original_key"], json!(key));

    manager.cleanup().await.unwrap();
}

/// The cross-tier retrieval dispatcher rejects unknown tiers, sources, and
/// spatial input types with their dedicated error kinds.
#[tokio::test]
async fn retrieval_dispatcher_error_taxonomy() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;
    let retrieval = manager.memory_retrieval();

    assert!(matches!(
        retrieval
            .retrieve("molten", None, None, None, None, None)
            .await,
        Err(memstrata::FabricError::TierUnknown(_))
    ));
    assert!(matches!(
        retrieval
            .retrieve("glacier", Some("satellite_x/scenes"), None, None, None, None)
            .await,
        Err(memstrata::FabricError::UnknownSource(_))
    ));
    assert!(matches!(
        retrieval
            .retrieve(
                "glacier",
                Some("local/buildings"),
                Some("orbital"),
                Some(&json!([0, 0, 1, 1])),
                None,
                None,
            )
            .await,
        Err(memstrata::FabricError::UnsupportedSpatialInput(_))
    ));

    manager.cleanup().await.unwrap();
}

/// Glacier retrieval dispatches on source to a data-source connector.
#[tokio::test]
async fn retrieval_from_local_data_source() {
    let dir = tempfile::tempdir().unwrap();
    let manager = common::manager_at(dir.path(), 8).await;

    // Seed the local data source's directory.
    let source_dir = manager.get_data_source_path("local").await.unwrap();
    std::fs::write(
        source_dir.join("buildings.json"),
        serde_json::to_vec(&json!([
            {"name": "tower", "height": 120.0, "lon": 55.27, "lat": 25.19},
            {"name": "shed", "height": 3.0, "lon": 10.0, "lat": 50.0},
        ]))
        .unwrap(),
    )
    .unwrap();

    let result = manager
        .memory_retrieval()
        .retrieve(
            "glacier",
            Some("local/buildings"),
            Some("bbox"),
            Some(&json!([55.0, 25.0, 56.0, 26.0])),
            None,
            None,
        )
        .await
        .unwrap();

    match result {
        memstrata::RetrievalResult::Frame(frame) => {
            assert_eq!(frame.num_rows(), 1);
            assert_eq!(frame.column("name").unwrap(), &[json!("tower")]);
        }
        other => panic!("expected a frame, got {other:?}"),
    }

    manager.cleanup().await.unwrap();
}
