pub mod state;

pub use state::{ClientSettings, SettingsError, SettingsStore};
