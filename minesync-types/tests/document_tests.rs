use minesync_types::{EpochMillis, GameStateDocument, SaveReason, UserId};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn new_document_starts_at_version_one() {
    let d = GameStateDocument::new(UserId::new("42"), json!({ "ore": 1 }));
    assert_eq!(d.version, 1);
    assert!(!d.is_minimal);
    assert!(d.last_saved.is_none());
    assert!(d.last_modified.as_millis() > 0);
    assert_eq!(d.save_reason, SaveReason::Auto);
}

#[test]
fn serializes_camel_case() {
    let d = GameStateDocument::new(UserId::new("42"), json!({}))
        .with_last_modified(EpochMillis::new(1000));
    let value = serde_json::to_value(&d).unwrap();
    assert_eq!(value["userId"], json!("42"));
    assert_eq!(value["lastModified"], json!(1000));
    assert_eq!(value["saveReason"], json!("auto"));
    assert_eq!(value["isMinimal"], json!(false));
    assert!(value.get("lastSaved").is_none());
}

#[test]
fn from_json_roundtrip() {
    let d = GameStateDocument::new(UserId::new("42"), json!({ "ore": 3, "tools": ["pick"] }))
        .with_version(7);
    let parsed = GameStateDocument::from_json(&d.to_json().unwrap()).unwrap();
    assert_eq!(parsed, d);
}

#[test]
fn from_value_defaults_optional_fields() {
    let d = GameStateDocument::from_value(json!({
        "userId": "42",
        "version": 3,
        "payload": { "ore": 1 }
    }))
    .unwrap();
    assert_eq!(d.version, 3);
    assert_eq!(d.save_reason, SaveReason::Auto);
    assert_eq!(d.last_modified, EpochMillis::new(0));
}

#[test]
fn from_value_reports_all_missing_fields() {
    let err = GameStateDocument::from_value(json!({ "userId": "42" })).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("payload"));
    assert!(msg.contains("version"));
}

#[test]
fn minimal_keeps_top_level_scalars() {
    let d = GameStateDocument::new(
        UserId::new("42"),
        json!({ "ore": 10, "name": "miner", "inventory": [1, 2], "upgrades": { "drill": 2 } }),
    );
    let m = d.minimal();
    assert!(m.is_minimal);
    assert_eq!(m.payload, json!({ "ore": 10, "name": "miner" }));
    assert_eq!(m.version, d.version);
    assert_eq!(m.user_id, d.user_id);
}

#[test]
fn effective_timestamp_falls_back_to_last_saved() {
    let mut d = GameStateDocument::new(UserId::new("42"), json!({}))
        .with_last_modified(EpochMillis::new(0));
    d.last_saved = Some("2024-01-01T00:00:00.000Z".to_string());
    assert_eq!(d.effective_timestamp(), EpochMillis::new(1_704_067_200_000));
}

#[test]
fn save_reason_wire_names() {
    assert_eq!(SaveReason::BeforeUnload.as_str(), "before_unload");
    assert_eq!(
        serde_json::to_value(SaveReason::Critical).unwrap(),
        json!("critical")
    );
    assert!(SaveReason::BeforeUnload.bypasses_interval());
    assert!(SaveReason::Critical.bypasses_interval());
    assert!(!SaveReason::Manual.bypasses_interval());
    assert!(!SaveReason::Auto.bypasses_interval());
}

#[test]
fn user_id_parse_rejects_blank() {
    assert!(UserId::parse("").is_err());
    assert!(UserId::parse("   ").is_err());
    assert_eq!(UserId::parse("17").unwrap().as_str(), "17");
    assert_eq!(UserId::from(17u64), UserId::new("17"));
}
