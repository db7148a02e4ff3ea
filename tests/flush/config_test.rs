/*!
 * Flush Configuration Tests
 * Presets, JSON loading and environment overrides
 */

use serial_test::serial;
use std::time::Duration;
use trial_metrics::flush::{CAPACITY_ENV, FLUSH_INTERVAL_ENV, MAX_RETRIES_ENV};
use trial_metrics::{FlushConfig, TrackerError};

fn clear_env() {
    for key in [CAPACITY_ENV, FLUSH_INTERVAL_ENV, MAX_RETRIES_ENV] {
        std::env::remove_var(key);
    }
}

#[test]
fn test_default_matches_service_limits() {
    let config = FlushConfig::default();
    assert_eq!(config.capacity, 10);
    assert_eq!(config.max_age, Duration::from_secs(1));
    assert_eq!(config.retry.max_attempts(), 5);
}

#[test]
fn test_json_round_trip_uses_milliseconds() {
    let json = serde_json::to_value(FlushConfig::aggressive()).unwrap();
    assert_eq!(json["max_age_ms"], 50);
    assert_eq!(json["retry"]["base_delay_ms"], 10);
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    std::env::set_var(CAPACITY_ENV, "25");
    std::env::set_var(FLUSH_INTERVAL_ENV, "250");
    std::env::set_var(MAX_RETRIES_ENV, "0");

    let config = FlushConfig::new().from_env().unwrap();
    clear_env();

    assert_eq!(config.capacity, 25);
    assert_eq!(config.max_age, Duration::from_millis(250));
    assert_eq!(config.retry.max_attempts(), 1);
}

#[test]
#[serial]
fn test_env_rejects_garbage() {
    clear_env();
    std::env::set_var(CAPACITY_ENV, "lots");

    let result = FlushConfig::new().from_env();
    clear_env();

    assert!(matches!(result, Err(TrackerError::Configuration(_))));
}

#[test]
#[serial]
fn test_env_rejects_zero_interval() {
    clear_env();
    std::env::set_var(FLUSH_INTERVAL_ENV, "0");

    let result = FlushConfig::new().from_env();
    clear_env();

    assert!(result.is_err());
}

#[test]
#[serial]
fn test_env_absent_keeps_preset() {
    clear_env();
    assert_eq!(FlushConfig::relaxed().from_env().unwrap(), FlushConfig::relaxed());
}
