use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const APP_DIR_NAME: &str = "limbus-localizer";
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/EveGlowLuna/LLC-TemporaryReplacer/refs/heads/main/install_info.json";
pub const DEFAULT_MIRROR_URL: &str = "https://gh-proxy.com";

/// User choices that survive between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default, alias = "game_path")]
    pub game_path: Option<PathBuf>,
    #[serde(default, alias = "font_path")]
    pub font_path: Option<PathBuf>,
    #[serde(default)]
    pub use_mirror: bool,
    #[serde(default, alias = "custom-proxy-url")]
    pub mirror_url: Option<String>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,
    #[serde(skip)]
    path: PathBuf,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        Self::load_or_create_in(&base_dir)
    }

    pub fn load_or_create_in(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.path = path;
            if let Some(font) = config.font_path.clone() {
                if !font.exists() {
                    tracing::warn!(font = %font.display(), "saved font no longer exists, clearing it");
                    config.font_path = None;
                    config.save()?;
                }
            }
            return Ok(config);
        }

        let config = AppConfig {
            game_path: None,
            font_path: None,
            use_mirror: false,
            mirror_url: None,
            http_proxy: None,
            manifest_url: default_manifest_url(),
            path,
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        write_atomic(&self.path, raw.as_bytes()).context("write app config")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where install records for every game target are kept.
    pub fn state_root(&self) -> PathBuf {
        self.base_dir().join("state")
    }

    /// Scratch space for downloads.
    pub fn download_dir(&self) -> PathBuf {
        self.base_dir().join("downloads")
    }

    fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Writes through a sibling temp file and renames it into place so a crash
/// never leaves a half-written file behind.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)
}

fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_string()
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join(APP_DIR_NAME))
}
