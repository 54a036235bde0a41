//! Storage layer tests for the device server.

use super::db::DeviceDatabase;
use super::gateway::{DeviceStore, UserDirectory};
use super::models::DeviceParams;

async fn test_db() -> DeviceDatabase {
    DeviceDatabase::open_in_memory().await.unwrap()
}

fn params(core_id: &str) -> DeviceParams<'_> {
    DeviceParams {
        core_id,
        name: None,
        registrar: None,
        ip: Some("10.0.0.7"),
        product_id: Some(6),
        firmware_version: Some(11),
        group_id: 0,
    }
}

// === Device tests ===

#[tokio::test]
async fn create_device_returns_generated_fields() {
    let db = test_db().await;
    let device = db.create_device(&params("a1b2")).await.unwrap();

    assert!(device.id > 0);
    assert_eq!(device.core_id, "a1b2");
    assert_eq!(device.ip.as_deref(), Some("10.0.0.7"));
    assert_eq!(device.firmware_version, Some(11));
    assert!(device.created_at > 0);
}

#[tokio::test]
async fn duplicate_core_id_is_reported_as_duplicate() {
    let db = test_db().await;
    db.create_device(&params("a1b2")).await.unwrap();

    let err = db.create_device(&params("a1b2")).await.unwrap_err();
    assert!(err.is_duplicate(), "got {err:?}");
}

#[tokio::test]
async fn update_device_keeps_created_at() {
    let db = test_db().await;
    let device = db.create_device(&params("a1b2")).await.unwrap();

    let updated = DeviceParams {
        name: Some("kitchen"),
        firmware_version: Some(12),
        ..params("a1b2")
    };
    assert!(db.update_device_row(device.id, &updated).await.unwrap());

    let reloaded = db.get_device(device.id).await.unwrap();
    assert_eq!(reloaded.name.as_deref(), Some("kitchen"));
    assert_eq!(reloaded.firmware_version, Some(12));
    assert_eq!(reloaded.created_at, device.created_at);
}

#[tokio::test]
async fn update_missing_device_returns_false() {
    let db = test_db().await;
    assert!(!db.update_device_row(42, &params("a1b2")).await.unwrap());
}

#[tokio::test]
async fn list_and_find_devices() {
    let db = test_db().await;
    db.create_device(&params("aa01")).await.unwrap();
    db.create_device(&params("aa02")).await.unwrap();

    let all = db.all_devices().await.unwrap();
    let ids: Vec<_> = all.iter().map(|d| d.core_id.as_str()).collect();
    assert_eq!(ids, vec!["aa01", "aa02"]);

    assert!(db.find_device("aa02").await.unwrap().is_some());
    assert!(db.find_device("ffff").await.unwrap().is_none());
}

// === Device key tests ===

#[tokio::test]
async fn public_key_upsert_keeps_claim_code() {
    let db = test_db().await;
    db.record_claim("a1b2", "CODE", None).await.unwrap();
    db.set_device_public_key("a1b2", "PEM").await.unwrap();

    let key = db.get_device_key("a1b2").await.unwrap().unwrap();
    assert_eq!(key.public_key, "PEM");
    assert_eq!(key.claim_code.as_deref(), Some("CODE"));
}

#[tokio::test]
async fn record_claim_creates_key_row_with_empty_public_key() {
    let db = test_db().await;
    db.record_claim("a1b2", "CODE", None).await.unwrap();

    let key = db.get_device_key("a1b2").await.unwrap().unwrap();
    assert_eq!(key.public_key, "");
    assert_eq!(key.claim_code.as_deref(), Some("CODE"));
}

#[tokio::test]
async fn record_claim_sets_registrar_with_code() {
    let db = test_db().await;
    db.create_device(&params("a1b2")).await.unwrap();
    db.set_device_public_key("a1b2", "PEM").await.unwrap();

    db.save_claim("a1b2", "CODE", Some("u1")).await.unwrap();

    let device = db.get_device_by_core_id("a1b2").await.unwrap().unwrap();
    assert_eq!(device.registrar.as_deref(), Some("u1"));
    let key = db.get_device_key("a1b2").await.unwrap().unwrap();
    assert_eq!(key.public_key, "PEM");
    assert_eq!(key.claim_code.as_deref(), Some("CODE"));
}

#[tokio::test]
async fn clear_claim_code_only_on_match() {
    let db = test_db().await;
    db.record_claim("a1b2", "CODE", None).await.unwrap();

    assert!(!db.clear_claim_code("a1b2", "WRONG").await.unwrap());
    assert!(db.clear_claim_code("a1b2", "CODE").await.unwrap());
    assert!(!db.clear_claim_code("a1b2", "CODE").await.unwrap());

    let key = db.get_device_key("a1b2").await.unwrap().unwrap();
    assert!(key.claim_code.is_none());
}

// === User tests ===

#[tokio::test]
async fn find_user_by_claim_code() {
    let db = test_db().await;
    db.create_user("u1", "alice", Some("XYZ")).await.unwrap();
    db.create_user("u2", "bob", None).await.unwrap();

    let user = db.find_user_by_claim_code("XYZ").await.unwrap().unwrap();
    assert_eq!(user.id, "u1");
    assert!(db.find_user_by_claim_code("nope").await.unwrap().is_none());
}
