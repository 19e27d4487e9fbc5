use super::*;

#[tokio::test]
async fn get_missing_key_is_none() {
    let store = DeviceStore::open_in_memory().await.unwrap();
    assert_eq!(store.get("nope").await.unwrap(), None);
}

#[tokio::test]
async fn put_get_round_trip() {
    let store = DeviceStore::open_in_memory().await.unwrap();
    store.put(KEY_GLOBAL_TIME, "12500").await.unwrap();
    assert_eq!(store.get(KEY_GLOBAL_TIME).await.unwrap().as_deref(), Some("12500"));
}

#[tokio::test]
async fn put_overwrites() {
    let store = DeviceStore::open_in_memory().await.unwrap();
    store.put(KEY_WAS_LEADER, "true").await.unwrap();
    store.put(KEY_WAS_LEADER, "false").await.unwrap();
    assert_eq!(store.get(KEY_WAS_LEADER).await.unwrap().as_deref(), Some("false"));
}

#[tokio::test]
async fn delete_removes() {
    let store = DeviceStore::open_in_memory().await.unwrap();
    store.put(KEY_LEADER_SINCE, "42").await.unwrap();
    store.delete(KEY_LEADER_SINCE).await.unwrap();
    assert_eq!(store.get(KEY_LEADER_SINCE).await.unwrap(), None);
}

#[tokio::test]
async fn identity_is_created_once_and_reused() {
    let store = DeviceStore::open_in_memory().await.unwrap();

    let (session_a, client_a) = store.load_or_create_identity().await.unwrap();
    let (session_b, client_b) = store.load_or_create_identity().await.unwrap();

    assert_eq!(session_a, session_b);
    assert_eq!(client_a, client_b);
    assert_ne!(session_a, client_a);
}

#[tokio::test]
async fn identity_survives_reopen_on_disk() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("liftsync-store-test-{}.sqlite", uuid::Uuid::new_v4()));

    let first = {
        let store = DeviceStore::open(&path).await.unwrap();
        store.put(KEY_LEADER_SINCE, "1700").await.unwrap();
        store.load_or_create_identity().await.unwrap()
    };

    let store = DeviceStore::open(&path).await.unwrap();
    let second = store.load_or_create_identity().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.get(KEY_LEADER_SINCE).await.unwrap().as_deref(), Some("1700"));

    let _ = std::fs::remove_file(&path);
}
