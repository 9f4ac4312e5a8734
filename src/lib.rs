pub mod config;
pub mod core;
pub mod drawings;
pub mod stores;
pub mod utils;

// 重新导出核心类型
pub use core::{
    Destination,
    FailureKind,
    FileRef,
    MetadataStore,
    ModuleRef,
    QueueError,
    QueueEvent,
    QueueSnapshot,
    RemoteFileStore,
    Result,
    StoredFile,
    Subscription,
    TaskFailure,
    TaskId,
    TaskStatus,
    UploadOptions,
    UploadProgress,
    UploadQueue,
    UploadQueueHandle,
    UploadTask,
};

pub use config::{Config, QueueConfig};

// 重新导出存储实现
pub use stores::{
    GraphFileStore,
    MemoryFileStore,
    MemoryMetadataStore,
    RestMetadataStore,
};
