use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["relay.toml", "relay.json"];

/// Load config from the given path (TOML or JSON by extension).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "json" => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid JSON in {}: {e}", path.display())),
        _ => toml::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid TOML in {}: {e}", path.display())),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./relay.{toml,json}` (project-local)
/// 2. `~/.config/relay/relay.{toml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found, then applies
/// `RELAY_*` env overrides either way.
pub fn discover_and_load() -> RelayConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                RelayConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        RelayConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/relay/
    if let Some(dirs) = directories::ProjectDirs::from("", "", "relay") {
        for name in CONFIG_FILENAMES {
            let p = dirs.config_dir().join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Apply `RELAY_*` environment overrides on top of a loaded config.
///
/// Deployment knobs only; anything structural stays in the file.
pub fn apply_env_overrides(config: &mut RelayConfig) {
    if let Ok(port) = std::env::var("RELAY_WS_PORT")
        && let Ok(port) = port.parse()
    {
        config.gateway.ws_port = port;
    }
    if let Ok(port) = std::env::var("RELAY_WEBHOOK_PORT")
        && let Ok(port) = port.parse()
    {
        config.gateway.webhook_port = port;
    }
    if let Ok(bind) = std::env::var("RELAY_BIND") {
        config.gateway.bind = bind;
    }
    if let Ok(url) = std::env::var("RELAY_DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(url) = std::env::var("RELAY_REDIS_URL") {
        config.queue.redis_url = Some(url);
        config.queue.backend = crate::schema::QueueBackend::Redis;
    }
    if let Ok(key) = std::env::var("RELAY_MASTER_KEY") {
        config.vault.master_key = Some(key);
    }
}
