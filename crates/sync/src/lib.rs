pub mod config;
pub mod storage;
pub mod sync;

pub use config::{DryerSettings, Origin};
pub use storage::{LocalStorage, PresetStorage, StorageError, StoredFile};
pub use sync::{sync_presets, PresetOutcome, SyncError, SyncReport};
