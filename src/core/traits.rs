use std::sync::Arc;
use async_trait::async_trait;
use crate::drawings::model::{
    ActivityEntry,
    Drawing,
    DrawingVersion,
    Folder,
    NewDrawing,
    NewFolder,
    NewVersion,
};
use crate::drawings::paths::FolderPath;
use super::types::{FileRef, StorageBackend, StoredFile, UploadProgress};
use super::errors::Result;

/// 进度回调，每次进度变化都会调用
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// 远端文件存储 - 所有文档库实现都必须实现此接口
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// 存储是否已配置可用
    fn is_available(&self) -> bool {
        true
    }

    /// 存储后端类型，写入版本记录
    fn backend(&self) -> StorageBackend;

    /// 确保目录存在，可重复调用
    async fn ensure_folder(&self, path: &FolderPath) -> Result<()>;

    /// 上传文件到目录，返回远端文件引用
    async fn upload_file(
        &self,
        file: &FileRef,
        path: &FolderPath,
        file_name: &str,
        on_progress: ProgressCallback,
    ) -> Result<StoredFile>;

    async fn delete_file(&self, id: &str) -> Result<()>;

    async fn download_url(&self, id: &str) -> Result<String>;

    async fn preview_url(&self, id: &str) -> Result<String>;
}

/// 元数据存储 - 图纸、版本、目录和操作日志
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// 图纸由所在目录和名称唯一确定
    async fn find_drawing(&self, project_id: &str, folder_id: &str, name: &str) -> Result<Option<Drawing>>;

    async fn create_drawing(&self, drawing: NewDrawing) -> Result<Drawing>;

    async fn list_versions(&self, drawing_id: &str) -> Result<Vec<DrawingVersion>>;

    async fn create_version(&self, version: NewVersion) -> Result<DrawingVersion>;

    async fn find_folder(&self, project_id: &str, parent_id: Option<&str>, name: &str) -> Result<Option<Folder>>;

    async fn create_folder(&self, folder: NewFolder) -> Result<Folder>;

    /// 尽力而为，调用方只记录失败
    async fn log_activity(&self, entry: ActivityEntry) -> Result<()>;
}
