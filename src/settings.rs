use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::chunked::ChunkPlan;
use crate::error::BridgeError;
use crate::registry::DuplicatePolicy;

/// Bridge settings stored in the config directory. Missing fields take their
/// defaults, so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct BridgeSettings {
    pub version: u32,
    /// TCP port the design host's plugin connects to.
    pub host_port: u16,
    /// Port of the tool-facing HTTP surface. 0 lets the OS pick.
    pub api_port: u16,
    #[ts(type = "number")]
    pub request_timeout_ms: u64,
    /// Timeout for long-running scans; progress reports push it out further.
    #[ts(type = "number")]
    pub long_request_timeout_ms: u64,
    pub scan_chunk_size: usize,
    pub mutation_chunk_size: usize,
    #[ts(type = "number")]
    pub item_delay_ms: u64,
    #[ts(type = "number")]
    pub chunk_delay_ms: u64,
    pub max_batch_units: usize,
    pub max_concurrency: usize,
    #[ts(type = "\"reject\" | \"replace\"")]
    pub duplicate_policy: DuplicatePolicy,
    pub log_level: String,
}

const SETTINGS_VERSION: u32 = 1;

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            host_port: 9455,
            api_port: 0,
            request_timeout_ms: 30_000,
            long_request_timeout_ms: 120_000,
            scan_chunk_size: 10,
            mutation_chunk_size: 5,
            item_delay_ms: 5,
            chunk_delay_ms: 50,
            max_batch_units: 200,
            max_concurrency: 4,
            duplicate_policy: DuplicatePolicy::Reject,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn long_request_timeout(&self) -> Duration {
        Duration::from_millis(self.long_request_timeout_ms)
    }

    pub fn scan_plan(&self) -> ChunkPlan {
        ChunkPlan::new(self.scan_chunk_size).with_delays(
            Duration::from_millis(self.item_delay_ms),
            Duration::from_millis(self.chunk_delay_ms),
        )
    }

    pub fn mutation_plan(&self) -> ChunkPlan {
        ChunkPlan::new(self.mutation_chunk_size).with_delays(
            Duration::from_millis(self.item_delay_ms),
            Duration::from_millis(self.chunk_delay_ms),
        )
    }

    /// Settings suitable for tests: no pacing delays.
    pub fn without_delays(mut self) -> Self {
        self.item_delay_ms = 0;
        self.chunk_delay_ms = 0;
        self
    }
}

/// Load settings from the config directory. Returns None if no settings file exists.
pub fn load_settings(config_dir: &Path) -> Result<Option<BridgeSettings>, BridgeError> {
    let path = crate::paths::settings_path(config_dir);
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(&path)?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| BridgeError::Settings {
            message: format!("{}: {e}", path.display()),
        })
}

/// Save settings to the config directory.
pub fn save_settings(config_dir: &Path, settings: &BridgeSettings) -> Result<(), BridgeError> {
    fs::create_dir_all(config_dir)?;
    let json = serde_json::to_string_pretty(settings).map_err(|e| BridgeError::Settings {
        message: e.to_string(),
    })?;
    atomic_write(&crate::paths::settings_path(config_dir), json.as_bytes())
}

/// Write through a sibling `.tmp` file and rename over the target, keeping the
/// previous version as `.bak`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), BridgeError> {
    let file_name = path.file_name().unwrap_or_default();

    let mut tmp_name = OsString::from(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut bak_name = OsString::from(file_name);
    bak_name.push(".bak");
    let bak_path = path.with_file_name(&bak_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    // Best-effort backup
    if path.exists() {
        let _ = fs::rename(path, &bak_path);
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let dir = std::env::temp_dir().join("design_bridge_test_settings");
        let _ = fs::remove_dir_all(&dir);

        let mut settings = BridgeSettings::default();
        settings.host_port = 9999;
        settings.duplicate_policy = DuplicatePolicy::Replace;
        save_settings(&dir, &settings).unwrap();
        save_settings(&dir, &settings).unwrap();

        let loaded = load_settings(&dir).unwrap().expect("should load");
        assert_eq!(loaded, settings);
        assert!(dir.join("settings.json.bak").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = std::env::temp_dir().join("design_bridge_test_partial");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            crate::paths::settings_path(&dir),
            r#"{ "host_port": 7000, "duplicate_policy": "replace" }"#,
        )
        .unwrap();

        let loaded = load_settings(&dir).unwrap().unwrap();
        assert_eq!(loaded.host_port, 7000);
        assert_eq!(loaded.duplicate_policy, DuplicatePolicy::Replace);
        assert_eq!(loaded.scan_chunk_size, 10);
        assert_eq!(loaded.request_timeout(), Duration::from_secs(30));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_malformed_file_is_a_settings_error() {
        let dir = std::env::temp_dir().join("design_bridge_test_malformed");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(crate::paths::settings_path(&dir), "{ not json").unwrap();

        assert!(matches!(load_settings(&dir), Err(BridgeError::Settings { .. })));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = std::env::temp_dir().join("design_bridge_test_no_settings");
        let _ = fs::remove_dir_all(&dir);
        assert!(load_settings(&dir).unwrap().is_none());
    }
}
