use std::path::Path;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::{QueueError, Result};

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务状态，只能向前推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 等待中（在队列中）
    Queued,
    /// 上传中
    Uploading,
    /// 已完成
    Complete,
    /// 失败
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// 上传阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadPhase {
    /// 准备中（解析目录、计算版本）
    Preparing,
    /// 创建上传会话
    CreatingSession,
    /// 上传中
    Uploading,
    /// 已完成
    Complete,
}

/// 单个任务的进度信息
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct UploadProgress {
    /// 完成百分比 0-100
    pub percent: f64,
    pub phase: UploadPhase,
    /// 已上传字节数
    pub bytes_uploaded: u64,
    /// 总字节数
    pub total_bytes: u64,
    /// 当前速度（字节/秒）
    pub speed_bytes_per_sec: f64,
}

impl UploadProgress {
    pub fn new(phase: UploadPhase, bytes_uploaded: u64, total_bytes: u64, speed_bytes_per_sec: f64) -> Self {
        let percent = if total_bytes > 0 {
            (bytes_uploaded as f64 / total_bytes as f64 * 100.0).clamp(0.0, 100.0)
        } else if phase == UploadPhase::Complete {
            100.0
        } else {
            0.0
        };

        Self {
            percent,
            phase,
            bytes_uploaded,
            total_bytes,
            speed_bytes_per_sec,
        }
    }

    pub fn preparing(total_bytes: u64) -> Self {
        Self::new(UploadPhase::Preparing, 0, total_bytes, 0.0)
    }

    pub fn complete(total_bytes: u64) -> Self {
        Self::new(UploadPhase::Complete, total_bytes, total_bytes, 0.0)
    }
}

/// 待上传的文件，内容不做解释
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Bytes,
}

impl FileRef {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Build a file reference, guessing the MIME type from the name.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self::new(name, data, mime_type)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| QueueError::InvalidFile(format!("Can't read file name of {}", path.display())))?
            .to_string();

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(QueueError::InvalidFile(format!("{} is not a file", path.display())));
        }

        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(name, data))
    }
}

/// 模块包信息，用于计算模块子目录名
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModuleRef {
    pub serial_number: String,
    pub hitch_blm: String,
    pub rear_blm: String,
}

/// 上传目标
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Destination {
    pub project_id: String,
    pub project_name: String,
    pub category_name: String,
    pub discipline_name: String,
    /// 显式指定的模块目录名
    pub module_folder_name: Option<String>,
    /// 由模块信息推导模块目录名
    pub module: Option<ModuleRef>,
    /// 显式指定的上传文件名
    pub versioned_file_name: Option<String>,
}

/// 批量上传的公共参数
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UploadOptions {
    pub destination: Destination,
    /// 审计用的上传者
    pub created_by: String,
    pub notes: Option<String>,
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sharepoint,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Sharepoint => write!(f, "sharepoint"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

/// 远端存储返回的文件引用
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredFile {
    pub id: String,
    pub web_url: String,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    StoreUnavailable,
    FolderResolution,
    /// 上传本身失败，远端没有文件
    Transport,
    /// 上传前读取元数据失败
    Metadata,
    /// 文件已上传，但版本记录写入失败
    UploadedNotRecorded,
    Internal,
}

/// 任务失败信息
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether a file is known to exist in the remote store despite the failure.
    pub fn remote_file_exists(&self) -> bool {
        self.kind == FailureKind::UploadedNotRecorded
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// 队列事件
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// 任务已添加
    TaskAdded {
        task_id: TaskId,
    },
    /// 状态变更
    StateChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// 进度更新
    Progress {
        task_id: TaskId,
        progress: UploadProgress,
    },
    /// 任务完成
    Completed {
        task_id: TaskId,
        file: StoredFile,
        version: String,
    },
    /// 任务失败
    Failed {
        task_id: TaskId,
        failure: TaskFailure,
    },
    /// 排队中的任务被取消
    Cancelled {
        task_id: TaskId,
    },
    /// 结束的任务已从队列移除
    Removed {
        task_id: TaskId,
    },
}

// 静态断言确保类型是 Send的
const _: fn() = || {
    fn assert_send<T: Send + Sync>() {}
    assert_send::<FileRef>();
    assert_send::<QueueEvent>();
    assert_send::<UploadProgress>();
};
