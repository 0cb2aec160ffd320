pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    BucketSettings, CacheCategorySettings, CacheSettings, Config, ConversationBackend,
    ConversationSettings, LimiterSettings, NameStyleSetting, PlatformConfig, QueueBackendKind,
    QueueSettings, ServerConfig, TokenModeSetting, TransportKind, VaultSettings,
};
