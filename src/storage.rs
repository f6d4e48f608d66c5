// 本地设置持久化

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::settings::ClientSettings;

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/remotekit
/// Linux: ~/.config/remotekit
/// Windows: C:\Users\<用户名>\AppData\Roaming\remotekit
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to locate the system config directory")?
        .join("remotekit");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("Unable to create the config directory")?;
    }
    Ok(config_dir)
}

/// 获取设置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// 加载设置（文件不存在时返回默认值）
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from(&get_settings_file()?)
}

/// 保存设置
pub fn save_settings(settings: &ClientSettings) -> Result<()> {
    save_settings_to(&get_settings_file()?, settings)
}

pub fn load_settings_from(path: &Path) -> Result<ClientSettings> {
    if !path.exists() {
        return Ok(ClientSettings::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Unable to read settings file {}", path.display()))?;
    let settings: ClientSettings = serde_json::from_str(&content)
        .with_context(|| format!("Unable to parse settings file {}", path.display()))?;
    Ok(settings)
}

pub fn save_settings_to(path: &Path, settings: &ClientSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings).context("Unable to serialize settings")?;
    fs::write(path, content)
        .with_context(|| format!("Unable to write settings file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file() -> PathBuf {
        std::env::temp_dir().join(format!("remotekit-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = load_settings_from(&temp_file()).unwrap();
        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_file();
        let mut settings = ClientSettings::default();
        settings.traversal.max_children = 42;
        settings.sftp.request_timeout_secs = None;

        save_settings_to(&path, &settings).unwrap();
        let loaded = load_settings_from(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let path = temp_file();
        fs::write(&path, "{ not json").unwrap();
        let err = load_settings_from(&path).unwrap_err();
        let _ = fs::remove_file(&path);
        assert!(err.to_string().contains("Unable to parse settings file"));
    }
}
