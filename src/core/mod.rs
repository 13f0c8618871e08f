pub mod scanner;
pub mod source;
pub mod synchronizer;
pub mod watcher;

pub use scanner::{DirectoryScanner, LocalFile};
pub use source::{ChangeDetection, Poller, SourceBuilder, SourceState, SynchronizingSource};
pub use synchronizer::{
    FailedEntryPolicy, FetchLimit, LocalFilenameGenerator, PassSummary, PostProcess,
    RemoteFileSynchronizer, DEFAULT_DONE_SUFFIX, DEFAULT_TEMPORARY_FILE_SUFFIX,
};
pub use watcher::WatchService;
