// crates/erp-ingest-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for erp-ingest-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use erp_ingest_config::ConfigError;
use erp_ingest_config::IngestConfig;

/// Parses a TOML string into an `IngestConfig` for tests.
pub fn config_from_toml(toml_str: &str) -> Result<IngestConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns a minimal config with all defaults applied.
pub fn minimal_config() -> Result<IngestConfig, toml::de::Error> {
    config_from_toml("")
}

/// Checks that `result` is an error whose message contains `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> Result<(), String> {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}
