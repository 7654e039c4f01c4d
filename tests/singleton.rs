//! Process-wide manager initialisation is a guarded one-shot.

use memstrata::{FabricConfig, MemoryManager};

#[tokio::test]
async fn first_caller_wins_and_later_callers_observe_the_same_instance() {
    let dir = tempfile::tempdir().unwrap();
    assert!(MemoryManager::global().is_none());

    let first = MemoryManager::initialise(FabricConfig::rooted_at(dir.path()))
        .await
        .unwrap();

    // A second initialise with a different config still yields the first
    // instance.
    let other_dir = tempfile::tempdir().unwrap();
    let second = MemoryManager::initialise(FabricConfig::rooted_at(other_dir.path()))
        .await
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    let global = MemoryManager::global().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &global));

    first.cleanup().await.unwrap();
}
