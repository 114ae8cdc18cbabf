//! Layered configuration: built-in defaults, optional file, then environment.

use anyhow::{Context, Result};
use config::{Config, Environment, File};

/// Names a YAML/TOML/JSON file layered over the defaults.
pub const CONFIG_FILE_ENV: &str = "ANNOTATOR_CONFIG_FILE";
/// Environment overrides look like `ANNOTATOR__NAMING_SUBJECT=...`.
pub const ENV_PREFIX: &str = "ANNOTATOR";

/// Keys parsed as comma separated lists when they come from the environment.
const LIST_KEYS: &[&str] = &["camera_ids", "reid_source_ids"];

/// Builds the merged source tree for `service`. Callers deserialize it into their
/// own settings type, which should carry `#[serde(default)]` for missing keys.
pub fn layered_config(service: &str) -> Result<Config> {
    let mut builder = Config::builder()
        .set_default("service_name", service)?
        .set_default("log_level", "info")?;

    if let Ok(file) = std::env::var(CONFIG_FILE_ENV) {
        builder = builder.add_source(File::with_name(&file).required(false));
    }

    let mut env = Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .try_parsing(true);
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }
    builder = builder.add_source(env);

    builder.build().with_context(|| format!("loading configuration for {service}"))
}
