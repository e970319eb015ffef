// Integration tests for the Bank storage abstraction against the real
// in-memory backend.

use std::sync::Arc;

use parasol::bank::{Bank, BankError, MemoryBankPlugin, SortDir};
use pretty_assertions::assert_eq;
use serde_json::json;

fn bank() -> Bank {
    Bank::new(Arc::new(MemoryBankPlugin::new("test-owner")))
}

#[tokio::test]
async fn test_section_list_strips_own_prefix() {
    let bank = bank();
    let section = bank.get_sub_section("/checkpoints", true).unwrap();

    section.create_object("cp-1/index.json", json!({"id": "cp-1"})).await.unwrap();
    section.create_object("cp-2/index.json", json!({"id": "cp-2"})).await.unwrap();

    let keys = section.list_objects(None, None, None, SortDir::Asc).await.unwrap();
    assert_eq!(keys, vec!["cp-1/index.json", "cp-2/index.json"]);

    // The same objects through the bank root carry the full path.
    let full = bank
        .list_objects("/checkpoints", None, None, SortDir::Asc)
        .await
        .unwrap();
    assert_eq!(
        full,
        vec!["/checkpoints/cp-1/index.json", "/checkpoints/cp-2/index.json"]
    );
}

#[tokio::test]
async fn test_key_normalization_collapses_slashes() {
    let bank = bank();
    bank.create_object("/a//b///c", json!(1)).await.unwrap();
    assert_eq!(bank.get_object("/a/b/c").await.unwrap(), json!(1));

    assert!(matches!(
        bank.get_object("/a/../b").await,
        Err(BankError::InvalidKey(_))
    ));
    assert!(matches!(
        bank.get_object("").await,
        Err(BankError::InvalidKey(_))
    ));
}

#[tokio::test]
async fn test_read_only_section_rejects_writes() {
    let bank = bank();
    bank.create_object("/data/a", json!(1)).await.unwrap();

    let section = bank.get_sub_section("/data", false).unwrap();
    assert_eq!(section.get_object("a").await.unwrap(), json!(1));

    assert!(matches!(
        section.create_object("b", json!(2)).await,
        Err(BankError::ReadOnly(_))
    ));
    assert!(matches!(
        section.update_object("a", json!(2)).await,
        Err(BankError::ReadOnly(_))
    ));
    assert!(matches!(
        section.delete_object("a").await,
        Err(BankError::ReadOnly(_))
    ));
}

#[tokio::test]
async fn test_read_only_section_never_yields_writable_child() {
    let bank = bank();
    let read_only = bank.get_sub_section("/data", false).unwrap();

    assert!(matches!(
        read_only.get_sub_section("nested", true),
        Err(BankError::ReadOnly(_))
    ));

    // Read-only children are fine, and stay read-only.
    let nested = read_only.get_sub_section("nested", false).unwrap();
    assert!(!nested.is_writable());
    assert!(matches!(
        nested.get_sub_section("deeper", true),
        Err(BankError::ReadOnly(_))
    ));
}

#[tokio::test]
async fn test_pagination_forwarded_to_backend() {
    let bank = bank();
    let section = bank.get_sub_section("/p", true).unwrap();
    for name in ["a", "b", "c", "d"] {
        section.create_object(name, json!(null)).await.unwrap();
    }

    let first = section
        .list_objects(None, Some(2), None, SortDir::Asc)
        .await
        .unwrap();
    assert_eq!(first, vec!["a", "b"]);

    let second = section
        .list_objects(None, Some(2), Some("b"), SortDir::Asc)
        .await
        .unwrap();
    assert_eq!(second, vec!["c", "d"]);

    let desc = section
        .list_objects(None, Some(1), None, SortDir::Desc)
        .await
        .unwrap();
    assert_eq!(desc, vec!["d"]);
}
