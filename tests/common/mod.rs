//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use memstrata::{ConnectorConfig, FabricConfig, MemoryManager};

/// A full fabric rooted at a temp directory, with a local-filesystem glacier
/// connector named `obj` as the default.
pub async fn manager_at(dir: &Path, vector_dim: usize) -> Arc<MemoryManager> {
    let mut config = FabricConfig::rooted_at(dir);
    config.memory.red_hot.vector_dim = vector_dim;
    config.memory.glacier.connectors.insert(
        "obj".into(),
        ConnectorConfig {
            kind: "local".into(),
            ..Default::default()
        },
    );
    config.memory.glacier.default_connector = Some("obj".into());
    MemoryManager::new(config).await.expect("manager init")
}

/// Write a small parquet file with columns `(name TEXT, height DOUBLE)` and
/// three rows.
pub fn write_parquet(path: &Path) {
    use parquet::data_type::{ByteArray, ByteArrayType, DoubleType};
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;

    let schema = Arc::new(
        parse_message_type(
            "message rows { required binary name (UTF8); required double height; }",
        )
        .unwrap(),
    );
    let file = std::fs::File::create(path).unwrap();
    let mut writer =
        SerializedFileWriter::new(file, schema, Arc::new(WriterProperties::builder().build()))
            .unwrap();
    let mut group = writer.next_row_group().unwrap();

    let mut names = group.next_column().unwrap().unwrap();
    names
        .typed::<ByteArrayType>()
        .write_batch(
            &[
                ByteArray::from("n1"),
                ByteArray::from("n2"),
                ByteArray::from("n3"),
            ],
            None,
            None,
        )
        .unwrap();
    names.close().unwrap();

    let mut heights = group.next_column().unwrap().unwrap();
    heights
        .typed::<DoubleType>()
        .write_batch(&[1.5, 2.5, 3.5], None, None)
        .unwrap();
    heights.close().unwrap();

    group.close().unwrap();
    writer.close().unwrap();
}
