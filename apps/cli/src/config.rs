//! Settings file handling

use anyhow::{Context, Result};
use dlrelay_types::Settings;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

const SETTINGS_FILE: &str = "settings.json";

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("dlrelay"))
        .unwrap_or_else(|| PathBuf::from(".dlrelay"))
}

/// Load `settings.json` from `data_dir`, writing the defaults on first run
pub async fn load_settings(data_dir: &Path) -> Result<Settings> {
    let path = data_dir.join(SETTINGS_FILE);

    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings file {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let settings = Settings::default();
            tokio::fs::create_dir_all(data_dir)
                .await
                .with_context(|| format!("cannot create {}", data_dir.display()))?;
            tokio::fs::write(&path, serde_json::to_string_pretty(&settings)?).await?;
            info!("Wrote default settings to {}", path.display());
            Ok(settings)
        }
        Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
    }
}
