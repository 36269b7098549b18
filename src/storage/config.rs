use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{json, Map, Value};

use tunefetch_core::models::settings::AppSettings;

pub const CONFIG_ENV: &str = "TUNEFETCH_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.json";

/// First CLI argument, then `TUNEFETCH_CONFIG`, then `./config.json`.
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_ENV).ok().filter(|v| !v.trim().is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Loads and validates the settings document. A missing file yields the
/// defaults; an unreadable or invalid one is an error.
pub fn load_settings(path: &Path) -> anyhow::Result<AppSettings> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("{} not found, using default settings", path.display());
            return Ok(AppSettings::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    parse_settings(&text).with_context(|| format!("Invalid settings in {}", path.display()))
}

pub fn parse_settings(text: &str) -> anyhow::Result<AppSettings> {
    let value: Value = serde_json::from_str(text).context("not valid JSON")?;
    let value = if is_legacy(&value) {
        tracing::info!("migrating legacy settings document");
        migrate_legacy(&value)
    } else {
        value
    };

    let settings: AppSettings = serde_json::from_value(value)?;
    settings.validate()?;
    Ok(settings)
}

fn is_legacy(value: &Value) -> bool {
    value.get("settings").is_some() || value.get("app_data").is_some()
}

fn section(value: &Value, name: &str) -> Map<String, Value> {
    value
        .get(name)
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default()
}

fn carry(from: &Map<String, Value>, old_key: &str, to: &mut Map<String, Value>, new_key: &str) {
    if let Some(v) = from.get(old_key) {
        to.insert(new_key.to_string(), v.clone());
    }
}

/// Maps the flat `settings` / `app_data` layout onto the current sections.
/// Unknown legacy keys (`user_login`, `config_version`) are dropped.
pub fn migrate_legacy(value: &Value) -> Value {
    let old = section(value, "settings");
    let data = section(value, "app_data");

    let mut download = Map::new();
    carry(&old, "is_playlist", &mut download, "collection_mode");
    carry(&old, "audio_only", &mut download, "audio_only");
    carry(&old, "max_name_length", &mut download, "max_filename_length");
    carry(&old, "truncate_suffix", &mut download, "truncation_marker");
    carry(&old, "metadata", &mut download, "save_thumbnails");
    carry(&data, "download_path", &mut download, "download_dir");

    let mut advanced = Map::new();
    carry(&old, "parallel_threads", &mut advanced, "parallelism");
    carry(&old, "max_retry_attempt", &mut advanced, "max_retry_attempts");

    let mut sources = Map::new();
    carry(&data, "single_url", &mut sources, "items");
    carry(&data, "playlist_url", &mut sources, "collections");

    json!({
        "download": download,
        "advanced": advanced,
        "sources": sources,
    })
}
