use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::types::{
    Destination,
    FileRef,
    StoredFile,
    TaskFailure,
    TaskId,
    TaskStatus,
    UploadOptions,
    UploadProgress,
};

/// One file's journey from enqueue to completion or failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: FileRef,
    pub destination: Destination,
    pub created_by: String,
    pub notes: Option<String>,
    pub status: TaskStatus,
    pub progress: UploadProgress,
    pub error: Option<TaskFailure>,
    /// 上传成功后的远端文件引用，即使后续记录失败也保留
    pub remote_file: Option<StoredFile>,
    /// 写入的版本号
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(file: FileRef, options: &UploadOptions) -> Self {
        let progress = UploadProgress::preparing(file.size);
        Self {
            id: TaskId::new(),
            file,
            destination: options.destination.clone(),
            created_by: options.created_by.clone(),
            notes: options.notes.clone(),
            status: TaskStatus::Queued,
            progress,
            error: None,
            remote_file: None,
            version: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }

    /// `queued -> uploading -> {complete | failed}`; nothing ever goes back.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Queued, Uploading) | (Uploading, Complete) | (Uploading, Failed)
        )
    }

    pub(crate) fn mark_uploading(&mut self) -> bool {
        if !Self::is_valid_transition(self.status, TaskStatus::Uploading) {
            return false;
        }
        self.status = TaskStatus::Uploading;
        self.start_time = Some(Utc::now());
        self.progress = UploadProgress::preparing(self.file.size);
        true
    }

    pub(crate) fn mark_complete(&mut self, file: StoredFile, version: String) -> bool {
        if !Self::is_valid_transition(self.status, TaskStatus::Complete) {
            return false;
        }
        self.status = TaskStatus::Complete;
        self.end_time = Some(Utc::now());
        self.progress = UploadProgress::complete(self.file.size);
        self.remote_file = Some(file);
        self.version = Some(version);
        true
    }

    pub(crate) fn mark_failed(&mut self, failure: TaskFailure, remote_file: Option<StoredFile>) -> bool {
        if !Self::is_valid_transition(self.status, TaskStatus::Failed) {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(failure);
        if remote_file.is_some() {
            self.remote_file = remote_file;
        }
        true
    }
}
