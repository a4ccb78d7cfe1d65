use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::input::DEFAULT_MAX_IMAGE_BYTES;

pub const DEFAULT_ASSISTANT_NAME: &str = "Danzin IA";
pub const DEFAULT_GREETING: &str =
    "Olá! Sou o Danzin IA, seu assistente inteligente. Como posso ajudá-lo hoje?";
pub const SETTINGS_DIRECTORY_NAME: &str = "danzin";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// User-tunable client settings. Conversation data never lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            greeting: default_greeting(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.assistant_name = match self.assistant_name.trim() {
            "" => default_assistant_name(),
            name => name.to_string(),
        };
        self.greeting = match self.greeting.trim() {
            "" => default_greeting(),
            greeting => greeting.to_string(),
        };
        if self.max_image_bytes == 0 {
            self.max_image_bytes = default_max_image_bytes();
        }

        self
    }

    /// Label shown while a reply is streaming.
    pub fn typing_label(&self) -> String {
        let short_name = self
            .assistant_name
            .split_whitespace()
            .next()
            .unwrap_or(DEFAULT_ASSISTANT_NAME);
        format!("{short_name} está pensando...")
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to parse settings at {path:?} on `{stage}`: {source}"))]
    ParseFile {
        stage: &'static str,
        path: PathBuf,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
}

/// Read-only settings source with atomic reload; clones share one snapshot.
#[derive(Clone)]
pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".danzin"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_or_default(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    /// Re-reads the file and swaps the snapshot; on a parse error the old one stays.
    pub fn reload(&self) -> Result<Arc<ClientSettings>, SettingsError> {
        let settings = Arc::new(Self::load_from_disk(&self.config_path)?);
        self.settings.store(settings.clone());
        tracing::info!(path = ?self.config_path, "reloaded settings");
        Ok(settings)
    }

    fn load_or_default(path: &Path) -> ClientSettings {
        match Self::load_from_disk(path) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(error = %error, "using default settings");
                ClientSettings::default()
            }
        }
    }

    fn load_from_disk(path: &Path) -> Result<ClientSettings, SettingsError> {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return Ok(ClientSettings::default());
        }

        let figment = Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path));

        let settings = figment
            .extract::<ClientSettings>()
            .context(ParseFileSnafu {
                stage: "extract-settings-json",
                path: path.to_path_buf(),
            })?;
        Ok(settings.normalized())
    }
}

fn default_assistant_name() -> String {
    DEFAULT_ASSISTANT_NAME.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

fn default_max_image_bytes() -> u64 {
    DEFAULT_MAX_IMAGE_BYTES
}
