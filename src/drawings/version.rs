//! Version numbering and metadata reconciliation around an upload.
//!
//! [`VersionReconciler::plan`] runs before any bytes are sent and decides where
//! the file goes, what it is called remotely and which version label it gets.
//! [`VersionReconciler::record`] runs after the remote store accepted the file.

use std::sync::Arc;
use chrono::Utc;
use crate::core::{MetadataStore, Result, StorageBackend, StoredFile, UploadTask};
use super::model::{
    ActivityEntry,
    Drawing,
    DrawingVersion,
    FolderType,
    NewDrawing,
    NewFolder,
    NewVersion,
    StorageRef,
};
use super::paths::{
    is_module_packages,
    next_available_filename,
    next_version_label,
    versioned_file_name,
    FolderPath,
};

/// Where and under which name a task's file is uploaded.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub folder: FolderPath,
    /// 远端文件名
    pub file_name: String,
    /// 已存在的图纸记录
    pub drawing: Option<Drawing>,
    pub version: String,
}

pub struct VersionReconciler {
    metadata: Arc<dyn MetadataStore>,
    module_packages_discipline: String,
}

impl VersionReconciler {
    pub fn new(metadata: Arc<dyn MetadataStore>, module_packages_discipline: impl Into<String>) -> Self {
        Self {
            metadata,
            module_packages_discipline: module_packages_discipline.into(),
        }
    }

    pub async fn plan(&self, task: &UploadTask) -> Result<UploadPlan> {
        let destination = &task.destination;
        let folder = FolderPath::resolve(destination, &task.file.name, &self.module_packages_discipline)?;

        // 图纸按目录区分，目录记录不存在时图纸也不存在
        let drawing = match self.find_leaf_folder(&destination.project_id, &folder).await? {
            Some(folder_id) => {
                self.metadata
                    .find_drawing(&destination.project_id, &folder_id, &task.file.name)
                    .await?
            }
            None => None,
        };
        let versions = match &drawing {
            Some(drawing) => self.metadata.list_versions(&drawing.id).await?,
            None => Vec::new(),
        };
        let version = next_version_label(versions.iter().map(|v| v.version.as_str()));

        let explicit = destination
            .versioned_file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        // 模块包把版本号写进文件名，即使元数据丢失也能识别
        let file_name = if let Some(name) = explicit {
            name.to_string()
        } else if is_module_packages(&folder.discipline, &self.module_packages_discipline) {
            versioned_file_name(&task.file.name, &version)
        } else {
            let existing: Vec<&str> = versions.iter().map(|v| v.file_name.as_str()).collect();
            next_available_filename(&task.file.name, &existing)
        };

        Ok(UploadPlan {
            folder,
            file_name,
            drawing,
            version,
        })
    }

    /// Write the drawing (if new), folder records and version for an uploaded file.
    pub async fn record(
        &self,
        task: &UploadTask,
        plan: &UploadPlan,
        backend: StorageBackend,
        stored: &StoredFile,
    ) -> Result<(Drawing, DrawingVersion)> {
        let project_id = &task.destination.project_id;
        let folder_id = self.ensure_folder_records(project_id, &plan.folder).await?;

        let drawing = match &plan.drawing {
            Some(drawing) => drawing.clone(),
            None => {
                self.metadata
                    .create_drawing(NewDrawing {
                        project_id: project_id.clone(),
                        discipline: plan.folder.discipline.clone(),
                        name: task.file.name.clone(),
                        folder_id: Some(folder_id),
                        created_by: task.created_by.clone(),
                    })
                    .await?
            }
        };

        let version = self
            .metadata
            .create_version(NewVersion {
                drawing_id: drawing.id.clone(),
                version: plan.version.clone(),
                file_name: plan.file_name.clone(),
                file_size: task.file.size,
                mime_type: task.file.mime_type.clone(),
                storage: StorageRef::new(backend, stored),
                uploaded_by: task.created_by.clone(),
                notes: task.notes.clone(),
            })
            .await?;

        Ok((drawing, version))
    }

    /// Activity logging never fails an upload.
    pub async fn log_upload(&self, task: &UploadTask, plan: &UploadPlan, drawing: &Drawing, version: &DrawingVersion) {
        let entry = ActivityEntry {
            action: "upload".to_string(),
            drawing_id: Some(drawing.id.clone()),
            project_id: task.destination.project_id.clone(),
            user_name: task.created_by.clone(),
            details: serde_json::json!({
                "file_name": version.file_name,
                "version": version.version,
                "folder": plan.folder.to_string(),
                "storage_id": version.storage.id,
            }),
            timestamp: Utc::now(),
        };

        if let Err(err) = self.metadata.log_activity(entry).await {
            tracing::warn!(task_id = %task.id, drawing_id = %drawing.id, error = %err, "failed to log upload activity");
        }
    }

    /// Leaf folder record id for `path`, if the whole chain already exists.
    async fn find_leaf_folder(&self, project_id: &str, path: &FolderPath) -> Result<Option<String>> {
        let mut parent_id: Option<String> = None;
        for (name, _) in folder_chain(path) {
            match self
                .metadata
                .find_folder(project_id, parent_id.as_deref(), name)
                .await?
            {
                Some(folder) => parent_id = Some(folder.id),
                None => return Ok(None),
            }
        }
        Ok(parent_id)
    }

    /// Make sure category / discipline / module folder records exist, returning the leaf id.
    async fn ensure_folder_records(&self, project_id: &str, path: &FolderPath) -> Result<String> {
        let mut parent_id: Option<String> = None;
        for (name, folder_type) in folder_chain(path) {
            let existing = self
                .metadata
                .find_folder(project_id, parent_id.as_deref(), name)
                .await?;
            let folder = match existing {
                Some(folder) => folder,
                None => {
                    self.metadata
                        .create_folder(NewFolder {
                            project_id: project_id.to_string(),
                            parent_id: parent_id.clone(),
                            name: name.to_string(),
                            folder_type,
                        })
                        .await?
                }
            };
            parent_id = Some(folder.id);
        }

        // chain always has at least two entries
        parent_id.ok_or_else(|| crate::core::QueueError::internal_error("empty folder chain"))
    }
}

fn folder_chain(path: &FolderPath) -> Vec<(&str, FolderType)> {
    let mut chain = vec![
        (path.category.as_str(), FolderType::Category),
        (path.discipline.as_str(), FolderType::Discipline),
    ];
    if let Some(module) = &path.module {
        chain.push((module.as_str(), FolderType::Module));
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Destination, FileRef, ModuleRef, UploadOptions};
    use crate::stores::MemoryMetadataStore;

    fn task(name: &str, discipline: &str) -> UploadTask {
        let options = UploadOptions {
            destination: Destination {
                project_id: "p1".into(),
                project_name: "Harbor View".into(),
                category_name: "Shop Drawings".into(),
                discipline_name: discipline.into(),
                ..Default::default()
            },
            created_by: "pat".into(),
            notes: None,
        };
        UploadTask::new(FileRef::from_bytes(name, vec![1u8; 4]), &options)
    }

    fn stored(id: &str) -> StoredFile {
        StoredFile {
            id: id.into(),
            web_url: format!("memory://{id}"),
            download_url: None,
        }
    }

    #[tokio::test]
    async fn test_first_upload_creates_drawing_and_folders() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reconciler = VersionReconciler::new(metadata.clone(), "Module Packages");
        let task = task("E-101.pdf", "Electrical");

        let plan = reconciler.plan(&task).await.unwrap();
        assert_eq!(plan.version, "1.0");
        assert_eq!(plan.file_name, "E-101.pdf");
        assert!(plan.drawing.is_none());

        let (drawing, version) = reconciler
            .record(&task, &plan, StorageBackend::Memory, &stored("f1"))
            .await
            .unwrap();
        assert_eq!(drawing.name, "E-101.pdf");
        assert_eq!(version.version, "1.0");
        assert_eq!(version.storage.id, "f1");

        let folders = metadata.folders();
        assert_eq!(folders.len(), 2);
        assert_eq!(drawing.folder_id.as_deref(), Some(folders[1].id.as_str()));
        assert_eq!(folders[1].parent_id.as_deref(), Some(folders[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_repeat_upload_bumps_version_and_renames() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reconciler = VersionReconciler::new(metadata.clone(), "Module Packages");

        for expected in ["1.0", "2.0", "3.0"] {
            let task = task("E-101.pdf", "Electrical");
            let plan = reconciler.plan(&task).await.unwrap();
            assert_eq!(plan.version, expected);
            reconciler
                .record(&task, &plan, StorageBackend::Memory, &stored(expected))
                .await
                .unwrap();
        }

        let drawings = metadata.drawings();
        assert_eq!(drawings.len(), 1);
        let drawing = &drawings[0];
        let names: Vec<_> = metadata
            .list_versions(&drawing.id)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.file_name)
            .collect();
        assert_eq!(names, vec!["E-101.pdf", "E-101_v2.pdf", "E-101_v3.pdf"]);
        assert_eq!(metadata.folders().len(), 2);
    }

    #[tokio::test]
    async fn test_module_package_embeds_version_in_name() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reconciler = VersionReconciler::new(metadata.clone(), "Module Packages");
        let mut task = task("Package.pdf", "Module Packages");
        task.destination.module = Some(ModuleRef {
            serial_number: "B1L2M15".into(),
            hitch_blm: "BLM-A".into(),
            rear_blm: "BLM-A".into(),
        });

        let plan = reconciler.plan(&task).await.unwrap();
        assert_eq!(plan.folder.module.as_deref(), Some("B1L2M15 | BLM-A"));
        assert_eq!(plan.file_name, "Package_v1.0.pdf");

        reconciler
            .record(&task, &plan, StorageBackend::Memory, &stored("f1"))
            .await
            .unwrap();
        let folders = metadata.folders();
        assert_eq!(folders.len(), 3);
        assert_eq!(folders[2].folder_type, FolderType::Module);

        let plan = reconciler.plan(&task).await.unwrap();
        assert_eq!(plan.file_name, "Package_v2.0.pdf");
    }

    #[tokio::test]
    async fn test_explicit_versioned_name_wins() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reconciler = VersionReconciler::new(metadata, "Module Packages");
        let mut task = task("B1L1M1 set.pdf", "Module Packages");
        task.destination.versioned_file_name = Some("custom.pdf".into());

        let plan = reconciler.plan(&task).await.unwrap();
        assert_eq!(plan.file_name, "custom.pdf");
        assert_eq!(plan.folder.module.as_deref(), Some("B1L1M1"));
    }
    /// Folder record ids from the category down to the drawing's folder.
    fn ancestry(metadata: &MemoryMetadataStore, folder_id: &str) -> Vec<String> {
        let folders = metadata.folders();
        let mut names = Vec::new();
        let mut current = folders.iter().find(|f| f.id == folder_id);
        while let Some(folder) = current {
            names.push(folder.name.clone());
            current = folder
                .parent_id
                .as_deref()
                .and_then(|parent| folders.iter().find(|f| f.id == parent));
        }
        names.reverse();
        names
    }

    #[tokio::test]
    async fn test_same_name_in_sibling_modules_are_separate_drawings() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reconciler = VersionReconciler::new(metadata.clone(), "Module Packages");

        for serial in ["B1L1M1", "B9L9M9"] {
            let mut task = task("Package.pdf", "Module Packages");
            task.destination.module = Some(ModuleRef {
                serial_number: serial.into(),
                ..Default::default()
            });

            let plan = reconciler.plan(&task).await.unwrap();
            assert!(plan.drawing.is_none());
            assert_eq!(plan.version, "1.0");
            assert_eq!(plan.file_name, "Package_v1.0.pdf");

            let (drawing, _) = reconciler
                .record(&task, &plan, StorageBackend::Memory, &stored(serial))
                .await
                .unwrap();
            let folder_id = drawing.folder_id.unwrap();
            assert_eq!(
                ancestry(&metadata, &folder_id),
                vec!["Shop Drawings", "Module Packages", serial]
            );
            assert_eq!(
                plan.folder.to_string(),
                format!("Harbor View/{}", ancestry(&metadata, &folder_id).join("/"))
            );
        }

        assert_eq!(metadata.drawings().len(), 2);
        // 分类和专业目录共用，模块目录各一个
        assert_eq!(metadata.folders().len(), 4);
    }

    #[tokio::test]
    async fn test_same_name_in_sibling_categories_are_separate_drawings() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reconciler = VersionReconciler::new(metadata.clone(), "Module Packages");

        for category in ["Shop Drawings", "Permits"] {
            let mut task = task("E-101.pdf", "Electrical");
            task.destination.category_name = category.into();

            let plan = reconciler.plan(&task).await.unwrap();
            assert_eq!(plan.version, "1.0");
            assert_eq!(plan.file_name, "E-101.pdf");

            let (drawing, _) = reconciler
                .record(&task, &plan, StorageBackend::Memory, &stored(category))
                .await
                .unwrap();
            assert_eq!(
                ancestry(&metadata, drawing.folder_id.as_deref().unwrap()),
                vec![category, "Electrical"]
            );
        }

        assert_eq!(metadata.drawings().len(), 2);
        assert_eq!(metadata.versions().len(), 2);
    }
}
