use crate::config::PipelineConfig;
use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Fingerprint of the effective configuration, stored on every run.
///
/// API keys are blanked first so rotating a credential does not look like a
/// behavioral change.
pub fn config_fingerprint(cfg: &PipelineConfig) -> String {
    let mut c = cfg.clone();
    c.api.sports_api_key = None;
    c.api.weather_api_key = None;
    let canonical = serde_json::to_string(&c).unwrap_or_default();
    sha256_hex(&canonical)
}
