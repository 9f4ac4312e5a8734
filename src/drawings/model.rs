//! Metadata records owned by the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::{StorageBackend, StoredFile};

/// A logical document that accumulates versions over time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Drawing {
    pub id: String,
    pub project_id: String,
    pub discipline: String,
    pub name: String,
    pub folder_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewDrawing {
    pub project_id: String,
    pub discipline: String,
    pub name: String,
    pub folder_id: Option<String>,
    pub created_by: String,
}

/// Pointer into the remote file store, tagged with the backend it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageRef {
    #[serde(rename = "storage_type")]
    pub backend: StorageBackend,
    #[serde(rename = "storage_id")]
    pub id: String,
    #[serde(rename = "storage_url")]
    pub web_url: String,
    pub download_url: Option<String>,
}

impl StorageRef {
    pub fn new(backend: StorageBackend, file: &StoredFile) -> Self {
        Self {
            backend,
            id: file.id.clone(),
            web_url: file.web_url.clone(),
            download_url: file.download_url.clone(),
        }
    }
}

/// One uploaded revision of a drawing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DrawingVersion {
    pub id: String,
    pub drawing_id: String,
    pub version: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(flatten)]
    pub storage: StorageRef,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewVersion {
    pub drawing_id: String,
    pub version: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(flatten)]
    pub storage: StorageRef,
    pub uploaded_by: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Category,
    Discipline,
    Module,
}

/// Project-scoped directory node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Folder {
    pub id: String,
    pub project_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub folder_type: FolderType,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewFolder {
    pub project_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub folder_type: FolderType,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActivityEntry {
    pub action: String,
    pub drawing_id: Option<String>,
    pub project_id: String,
    pub user_name: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Latest version by upload time; equal timestamps fall back to the numeric label.
pub fn latest_version(versions: &[DrawingVersion]) -> Option<&DrawingVersion> {
    versions.iter().max_by(|a, b| {
        a.uploaded_at.cmp(&b.uploaded_at).then_with(|| {
            let a = a.version.parse::<f64>().unwrap_or(0.0);
            let b = b.version.parse::<f64>().unwrap_or(0.0);
            a.total_cmp(&b)
        })
    })
}
