mod settings;

pub use settings::{LoggingSettings, QueueSettings, Settings, StorageSettings};
