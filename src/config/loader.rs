use crate::config::Config;
use crate::utils::{ensure_dir, get_lattice_home};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_lattice_home()?.join("config.json"))
}

/// Load config from disk, then apply environment overrides.
///
/// `APP_ID` / `APP_SECRET` fill in platform credentials; `USER_ACCESS_TOKEN`
/// is consumed later by the composition root (it belongs in the vault, not
/// the config).
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?
    } else {
        Config::default()
    };

    if let Ok(app_id) = std::env::var("APP_ID") {
        if !app_id.is_empty() {
            config.platform.app_id = app_id;
        }
    }
    if let Ok(app_secret) = std::env::var("APP_SECRET") {
        if !app_secret.is_empty() {
            config.platform.app_secret = app_secret;
        }
    }

    Ok(config)
}

pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    ensure_dir(path.parent().context("Config path has no parent")?)?;

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, &content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    // Restrict permissions (best-effort, may fail on Windows)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    Ok(())
}
