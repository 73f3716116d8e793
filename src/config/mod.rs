// src/config/mod.rs
//! Startup configuration: TTL, sweep interval, feeds, channels, watchlist.
//!
//! Lookup order for `load_default`:
//! 1) $FEED_PROCESSOR_CONFIG
//! 2) config/processor.toml
//! 3) config/processor.json
//! 4) built-in defaults
//!
//! Env overrides (`HIT_TTL_SECS`, `CLEANUP_INTERVAL_SECS`, `SEQUENCE_POLICY`)
//! are applied on top of whatever was loaded.

pub mod processor;

pub use processor::{
    BackoffConfig, ChannelConfig, FeedConfig, FeedKind, ProcessorConfig,
};

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::sequencer::SequencePolicy;

pub const ENV_CONFIG_PATH: &str = "FEED_PROCESSOR_CONFIG";
pub const ENV_TTL_SECS: &str = "HIT_TTL_SECS";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "CLEANUP_INTERVAL_SECS";
pub const ENV_SEQUENCE_POLICY: &str = "SEQUENCE_POLICY";

/// Load and validate config from an explicit path. TOML or JSON by extension.
pub fn load_from(path: &Path) -> Result<ProcessorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading processor config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_config(&content, &ext)
        .with_context(|| format!("parsing processor config {}", path.display()))?;
    apply_env_overrides(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_default() -> Result<ProcessorConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        return load_from(&pb);
    }
    for candidate in ["config/processor.toml", "config/processor.json"] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return load_from(&pb);
        }
    }
    let mut cfg = ProcessorConfig::default();
    apply_env_overrides(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

fn parse_config(s: &str, hint_ext: &str) -> Result<ProcessorConfig> {
    match hint_ext {
        "json" => Ok(serde_json::from_str(s)?),
        "toml" => Ok(toml::from_str(s)?),
        _ => {
            if let Ok(cfg) = toml::from_str(s) {
                return Ok(cfg);
            }
            serde_json::from_str(s).map_err(|_| anyhow!("unsupported config format"))
        }
    }
}

fn apply_env_overrides(cfg: &mut ProcessorConfig) -> Result<()> {
    if let Some(v) = env_u64(ENV_TTL_SECS)? {
        cfg.ttl_secs = v;
    }
    if let Some(v) = env_u64(ENV_CLEANUP_INTERVAL_SECS)? {
        cfg.cleanup_interval_secs = v;
    }
    if let Ok(raw) = std::env::var(ENV_SEQUENCE_POLICY) {
        cfg.sequence = match raw.trim().to_ascii_lowercase().as_str() {
            "reset" | "reset_on_start" => SequencePolicy::ResetOnStart,
            "persist" => match &cfg.sequence {
                SequencePolicy::Persist { .. } => cfg.sequence.clone(),
                SequencePolicy::ResetOnStart => SequencePolicy::persist_default(),
            },
            other => return Err(anyhow!("unsupported {ENV_SEQUENCE_POLICY} value `{other}`")),
        };
    }
    Ok(())
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{name} must be an unsigned integer")),
        Err(_) => Ok(None),
    }
}

/// Resolve an opaque credential. `env:NAME` reads the variable, anything else is literal.
pub fn resolve_credential(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("env:") => {
            let var = &trimmed[4..];
            std::env::var(var).map_err(|_| anyhow!("missing {var} env var"))
        }
        _ => Ok(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn toml_and_json_both_parse() {
        let toml_cfg = r#"
            ttl_secs = 3600
            keywords = ["cyber"]
        "#;
        let json_cfg = r#"{"ttl_secs": 7200, "keywords": ["fraud"]}"#;
        assert_eq!(parse_config(toml_cfg, "toml").unwrap().ttl_secs, 3600);
        assert_eq!(parse_config(json_cfg, "json").unwrap().keywords, vec!["fraud"]);
        assert_eq!(parse_config(json_cfg, "").unwrap().ttl_secs, 7200);
    }

    #[serial_test::serial]
    #[test]
    fn credentials_resolve_from_env() {
        env::set_var("CFP_TEST_TOKEN", "s3cret");
        assert_eq!(resolve_credential("env:CFP_TEST_TOKEN").unwrap(), "s3cret");
        assert_eq!(resolve_credential("ENV:CFP_TEST_TOKEN").unwrap(), "s3cret");
        assert_eq!(resolve_credential(" literal ").unwrap(), "literal");
        env::remove_var("CFP_TEST_TOKEN");
        assert!(resolve_credential("env:CFP_TEST_TOKEN").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_win() {
        env::set_var(ENV_TTL_SECS, "60");
        env::set_var(ENV_SEQUENCE_POLICY, "persist");
        let mut cfg = ProcessorConfig::default();
        apply_env_overrides(&mut cfg).unwrap();
        env::remove_var(ENV_TTL_SECS);
        env::remove_var(ENV_SEQUENCE_POLICY);
        assert_eq!(cfg.ttl_secs, 60);
        assert!(matches!(cfg.sequence, SequencePolicy::Persist { .. }));
    }
}
