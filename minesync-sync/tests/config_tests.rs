use minesync_sync::{Backoff, HttpRemoteConfig, Identity, SyncConfig};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serial_test::serial;
use std::time::Duration;

const VARS: [&str; 6] = [
    "MIN_SAVE_INTERVAL",
    "AUTO_SAVE_INTERVAL",
    "INITIAL_BACKOFF",
    "MAX_BACKOFF",
    "MAX_RETRY_ATTEMPTS",
    "SAVE_REQUEST_TIMEOUT",
];

fn clear_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

// ── Defaults ────────────────────────────────────────────────────

#[test]
fn sync_config_defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.min_save_interval(), Duration::from_secs(5));
    assert_eq!(config.auto_save_interval(), Duration::from_secs(15));
    assert_eq!(config.initial_backoff_ms, 500);
    assert_eq!(config.max_backoff_ms, 10_000);
    assert_eq!(config.max_retry_attempts, 2);
    assert_eq!(config.throttle_requeue(), Duration::from_secs(2));
    assert_eq!(config.storage.max_backup_copies, 3);
}

#[test]
fn sync_config_serde_fills_missing_fields() {
    let config: SyncConfig = serde_json::from_str(r#"{"min_save_interval_ms": 1000}"#).unwrap();
    assert_eq!(config.min_save_interval_ms, 1000);
    assert_eq!(config.auto_save_interval_ms, 15_000);
}

#[test]
fn remote_config_identity_roundtrip() {
    let config = HttpRemoteConfig {
        identity: Identity::FarcasterUser("4021".into()),
        ..Default::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: HttpRemoteConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.identity, Identity::FarcasterUser("4021".into()));
}

// ── Environment ─────────────────────────────────────────────────

#[test]
#[serial]
fn from_env_reads_overrides() {
    clear_env();
    unsafe {
        std::env::set_var("MIN_SAVE_INTERVAL", "2500");
        std::env::set_var("AUTO_SAVE_INTERVAL", "30000");
        std::env::set_var("MAX_RETRY_ATTEMPTS", "3");
    }
    let config = SyncConfig::from_env();
    clear_env();

    assert_eq!(config.min_save_interval_ms, 2500);
    assert_eq!(config.auto_save_interval_ms, 30_000);
    assert_eq!(config.max_retry_attempts, 3);
    assert_eq!(config.max_backoff_ms, 10_000);
}

#[test]
#[serial]
fn from_env_ignores_malformed_values() {
    clear_env();
    unsafe { std::env::set_var("INITIAL_BACKOFF", "soon") };
    let config = SyncConfig::from_env();
    clear_env();

    assert_eq!(config.initial_backoff_ms, 500);
}

#[test]
#[serial]
fn remote_timeout_from_env() {
    clear_env();
    unsafe { std::env::set_var("SAVE_REQUEST_TIMEOUT", "2500") };
    let config = HttpRemoteConfig::from_env("http://localhost:9999");
    clear_env();

    assert_eq!(config.request_timeout_ms, 2500);
    assert_eq!(config.base_url, "http://localhost:9999");
}

// ── Backoff ─────────────────────────────────────────────────────

#[test]
fn backoff_follows_configured_schedule() {
    let backoff = Backoff::from_config(&SyncConfig::default());
    assert_eq!(backoff.delay_for(1), Duration::from_millis(750));
    assert_eq!(backoff.delay_for(2), Duration::from_millis(1125));
    assert_eq!(backoff.delay_for(20), Duration::from_millis(10_000));
}

proptest! {
    #[test]
    fn backoff_is_monotonic_and_capped(failures in 1usize..40) {
        let mut backoff = Backoff::default();
        let mut previous = backoff.current();
        for _ in 0..failures {
            let next = backoff.record_failure();
            prop_assert!(next >= previous);
            prop_assert!(next <= Duration::from_millis(10_000));
            previous = next;
        }
    }

    #[test]
    fn record_failure_matches_closed_form(n in 1u32..12) {
        let mut backoff = Backoff::default();
        let mut last = Duration::ZERO;
        for _ in 0..n {
            last = backoff.record_failure();
        }
        let exact = (500.0 * 1.5f64.powi(n as i32)).min(10_000.0) as u64;
        prop_assert_eq!(last, Duration::from_millis(exact));
        prop_assert_eq!(last, backoff.delay_for(n));
    }
}
