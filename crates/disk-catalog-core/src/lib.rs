pub mod analysis;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod indexer;
pub mod progress;
pub mod storage;
pub mod volumes;

pub use cancel::CancelToken;
pub use catalog::{Catalog, SearchResult};
pub use config::{AppConfig, IndexSettings};
pub use coordinator::{ChangeNotification, IndexCoordinator, IndexProgress, JobOutcome, RequestOutcome};
pub use error::{Error, ErrorKind};
pub use indexer::{HashSummary, Indexer, JobState, ScanMode, ScanSummary};
pub use progress::{ProgressReporter, SilentReporter};
pub use storage::Store;
pub use volumes::{VolumeEvent, VolumeListener, VolumeState, VolumeStatus, VolumeTracker};
