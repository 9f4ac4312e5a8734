mod errors;
mod queue;
mod task;
mod traits;
mod types;
mod worker;

pub use errors::{QueueError, Result};
pub use queue::{Listener, QueueSnapshot, Subscription, UploadQueue, UploadQueueHandle};
pub use task::UploadTask;
pub use traits::{MetadataStore, ProgressCallback, RemoteFileStore};
pub use types::{
    Destination,
    FailureKind,
    FileRef,
    ModuleRef,
    QueueEvent,
    StorageBackend,
    StoredFile,
    TaskFailure,
    TaskId,
    TaskStatus,
    UploadOptions,
    UploadPhase,
    UploadProgress,
};
