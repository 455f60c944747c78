//! Engine configuration loader for the `weft` binary.
//!
//! Reads an optional TOML file into [`EngineConfig`]. Any problem with the
//! file yields the defaults.

use std::path::Path;

use weft_types::config::EngineConfig;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "weft.toml";

/// Load engine configuration from `path`, or from `./weft.toml` when `None`.
///
/// Never fails: a missing default file is silent, while a missing explicit
/// file or one that cannot be read or parsed is logged at `warn` and yields
/// [`EngineConfig::default()`].
pub async fn load_engine_config(path: Option<&Path>) -> EngineConfig {
    let explicit = path.is_some();
    let config_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let content = match tokio::fs::read_to_string(config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !explicit => {
            tracing::debug!(path = %config_path.display(), "no engine config, using defaults");
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "cannot read engine config, using defaults");
            return EngineConfig::default();
        }
    };

    toml::from_str::<EngineConfig>(&content).unwrap_or_else(|err| {
        tracing::warn!(path = %config_path.display(), error = %err, "invalid engine config, using defaults");
        EngineConfig::default()
    })
}
