use std::collections::{BTreeSet, HashMap};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;
use crate::core::{
    FileRef,
    MetadataStore,
    ProgressCallback,
    QueueError,
    RemoteFileStore,
    Result,
    StorageBackend,
    StoredFile,
    UploadPhase,
    UploadProgress,
};
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

/// 内存中保存的文件
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub id: String,
    pub folder: String,
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Default)]
struct MemoryFiles {
    folders: BTreeSet<String>,
    files: HashMap<String, StoredObject>,
}

/// In-process file store for tests and dry runs.
pub struct MemoryFileStore {
    inner: Mutex<MemoryFiles>,
    available: bool,
    progress_steps: u64,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryFiles::default()),
            available: true,
            progress_steps: 4,
        }
    }

    /// A store that reports itself as not configured.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// 上传时报告多少次中间进度
    pub fn with_progress_steps(mut self, steps: u64) -> Self {
        self.progress_steps = steps;
        self
    }

    pub fn folders(&self) -> Vec<String> {
        self.inner.lock().folders.iter().cloned().collect()
    }

    pub fn files(&self) -> Vec<StoredObject> {
        let mut files: Vec<_> = self.inner.lock().files.values().cloned().collect();
        files.sort_by(|a, b| (&a.folder, &a.name).cmp(&(&b.folder, &b.name)));
        files
    }

    pub fn file(&self, id: &str) -> Option<StoredObject> {
        self.inner.lock().files.get(id).cloned()
    }
}

impl Default for MemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFileStore for MemoryFileStore {
    fn is_available(&self) -> bool {
        self.available
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }

    async fn ensure_folder(&self, path: &FolderPath) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut current = String::new();
        for segment in path.segments() {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            inner.folders.insert(current.clone());
        }
        Ok(())
    }

    async fn upload_file(
        &self,
        file: &FileRef,
        path: &FolderPath,
        file_name: &str,
        on_progress: ProgressCallback,
    ) -> Result<StoredFile> {
        let folder = path.to_string();
        if !self.inner.lock().folders.contains(&folder) {
            return Err(QueueError::transport(format!("Folder not found: {folder}")));
        }

        let total = file.size;
        on_progress(UploadProgress::new(UploadPhase::CreatingSession, 0, total, 0.0));
        for step in 1..=self.progress_steps {
            let uploaded = total * step / self.progress_steps;
            on_progress(UploadProgress::new(UploadPhase::Uploading, uploaded, total, 0.0));
        }

        let mut inner = self.inner.lock();
        // 同名文件覆盖并沿用原来的 id
        let id = inner
            .files
            .values()
            .find(|object| object.folder == folder && object.name == file_name)
            .map(|object| object.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        inner.files.insert(id.clone(), StoredObject {
            id: id.clone(),
            folder: folder.clone(),
            name: file_name.to_string(),
            mime_type: file.mime_type.clone(),
            data: file.data.clone(),
        });
        drop(inner);

        on_progress(UploadProgress::complete(total));

        Ok(StoredFile {
            web_url: format!("memory://{folder}/{file_name}"),
            download_url: Some(format!("memory://{id}/content")),
            id,
        })
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        self.inner
            .lock()
            .files
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| QueueError::transport(format!("File not found: {id}")))
    }

    async fn download_url(&self, id: &str) -> Result<String> {
        match self.inner.lock().files.contains_key(id) {
            true => Ok(format!("memory://{id}/content")),
            false => Err(QueueError::transport(format!("File not found: {id}"))),
        }
    }

    async fn preview_url(&self, id: &str) -> Result<String> {
        match self.inner.lock().files.contains_key(id) {
            true => Ok(format!("memory://{id}/preview")),
            false => Err(QueueError::transport(format!("File not found: {id}"))),
        }
    }
}

#[derive(Default)]
struct MemoryRecords {
    drawings: Vec<Drawing>,
    versions: Vec<DrawingVersion>,
    folders: Vec<Folder>,
    activity: Vec<ActivityEntry>,
}

/// In-process metadata store for tests and dry runs.
#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<MemoryRecords>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drawings(&self) -> Vec<Drawing> {
        self.inner.lock().drawings.clone()
    }

    pub fn versions(&self) -> Vec<DrawingVersion> {
        self.inner.lock().versions.clone()
    }

    pub fn folders(&self) -> Vec<Folder> {
        self.inner.lock().folders.clone()
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.inner.lock().activity.clone()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn find_drawing(&self, project_id: &str, folder_id: &str, name: &str) -> Result<Option<Drawing>> {
        Ok(self
            .inner
            .lock()
            .drawings
            .iter()
            .find(|d| d.project_id == project_id && d.folder_id.as_deref() == Some(folder_id) && d.name == name)
            .cloned())
    }

    async fn create_drawing(&self, drawing: NewDrawing) -> Result<Drawing> {
        let drawing = Drawing {
            id: Uuid::new_v4().to_string(),
            project_id: drawing.project_id,
            discipline: drawing.discipline,
            name: drawing.name,
            folder_id: drawing.folder_id,
            created_by: drawing.created_by,
            created_at: Utc::now(),
        };
        self.inner.lock().drawings.push(drawing.clone());
        Ok(drawing)
    }

    async fn list_versions(&self, drawing_id: &str) -> Result<Vec<DrawingVersion>> {
        Ok(self
            .inner
            .lock()
            .versions
            .iter()
            .filter(|v| v.drawing_id == drawing_id)
            .cloned()
            .collect())
    }

    async fn create_version(&self, version: NewVersion) -> Result<DrawingVersion> {
        let mut inner = self.inner.lock();
        if !inner.drawings.iter().any(|d| d.id == version.drawing_id) {
            return Err(QueueError::metadata(format!("Unknown drawing {}", version.drawing_id)));
        }

        let version = DrawingVersion {
            id: Uuid::new_v4().to_string(),
            drawing_id: version.drawing_id,
            version: version.version,
            file_name: version.file_name,
            file_size: version.file_size,
            mime_type: version.mime_type,
            storage: version.storage,
            uploaded_by: version.uploaded_by,
            uploaded_at: Utc::now(),
            notes: version.notes,
        };
        inner.versions.push(version.clone());
        Ok(version)
    }

    async fn find_folder(&self, project_id: &str, parent_id: Option<&str>, name: &str) -> Result<Option<Folder>> {
        Ok(self
            .inner
            .lock()
            .folders
            .iter()
            .find(|f| f.project_id == project_id && f.parent_id.as_deref() == parent_id && f.name == name)
            .cloned())
    }

    async fn create_folder(&self, folder: NewFolder) -> Result<Folder> {
        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            project_id: folder.project_id,
            parent_id: folder.parent_id,
            name: folder.name,
            folder_type: folder.folder_type,
        };
        self.inner.lock().folders.push(folder.clone());
        Ok(folder)
    }

    async fn log_activity(&self, entry: ActivityEntry) -> Result<()> {
        self.inner.lock().activity.push(entry);
        Ok(())
    }
}
