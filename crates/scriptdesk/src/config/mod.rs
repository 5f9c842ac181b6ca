pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str, SettingsFormat};
pub use schema::{
    expand_home, LlmSettings, LoggingSettings, NotificationSettings, RetrySettings, Settings,
    StorageSettings, UploadSettings,
};
