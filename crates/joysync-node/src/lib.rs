//! Channel mirroring daemon.
//!
//! Wires the pipeline stages together: metadata polling (discovery),
//! download staging, on-chain creation and fleet upload, all driven by the
//! orchestrator against a durable state store.

pub mod assets;
pub mod config;
pub mod creator;
pub mod downloader;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod quota;
pub mod uploader;

pub use assets::AssetDirectory;
pub use config::Config;
pub use creator::OnChainCreator;
pub use downloader::DownloadWorker;
pub use error::{SyncError, SyncResult};
pub use orchestrator::Orchestrator;
pub use poller::MetadataPoller;
pub use quota::{QuotaTracker, SIGNUP_POOL, SYNC_POOL};
pub use uploader::Uploader;
