//! SharePoint document library over the Microsoft Graph REST API.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use url::Url;
use crate::config::SharePointConfig;
use crate::core::{
    FileRef,
    ProgressCallback,
    QueueError,
    RemoteFileStore,
    Result,
    StorageBackend,
    StoredFile,
    UploadPhase,
    UploadProgress,
};
use crate::drawings::paths::FolderPath;
use crate::utils::SpeedCalculator;

/// Graph requires upload session chunks in multiples of 320 KiB.
pub const CHUNK_ALIGNMENT: usize = 320 * 1024;
/// 超过此大小使用上传会话
pub const SIMPLE_UPLOAD_LIMIT: u64 = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    #[serde(rename = "webUrl", default)]
    web_url: String,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

impl From<DriveItem> for StoredFile {
    fn from(item: DriveItem) -> Self {
        StoredFile {
            id: item.id,
            web_url: item.web_url,
            download_url: item.download_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct PreviewLink {
    #[serde(rename = "getUrl")]
    get_url: String,
}

#[derive(Debug, Clone)]
pub struct GraphFileStore {
    client: Client,
    graph_url: String,
    drive_id: String,
    access_token: String,
    root_folder: Option<String>,
    chunk_size: usize,
}

impl GraphFileStore {
    pub fn new(config: &SharePointConfig) -> Result<Self> {
        Url::parse(&config.graph_url)
            .map_err(|_| QueueError::Config(format!("Invalid url: {:?}", config.graph_url)))?;

        if config.chunk_size == 0 || config.chunk_size % CHUNK_ALIGNMENT != 0 {
            return Err(QueueError::Config(format!(
                "chunk_size must be a non-zero multiple of {CHUNK_ALIGNMENT}, got {}",
                config.chunk_size
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            graph_url: config.graph_url.trim_end_matches('/').to_string(),
            drive_id: config.drive_id.clone(),
            access_token: config.access_token.clone(),
            root_folder: config
                .root_folder
                .as_deref()
                .map(str::trim)
                .filter(|root| !root.is_empty())
                .map(str::to_string),
            chunk_size: config.chunk_size,
        })
    }

    fn drive_url(&self) -> String {
        format!("{}/drives/{}", self.graph_url, self.drive_id)
    }

    /// 目录在文档库中的路径段
    fn remote_segments(&self, path: &FolderPath) -> Vec<String> {
        self.root_folder
            .iter()
            .map(String::as_str)
            .chain(path.segments())
            .map(sanitize_segment)
            .collect()
    }

    /// `{drive}/root:/{path}` or `{drive}/root` for the library root.
    fn path_url(&self, segments: &[String]) -> String {
        if segments.is_empty() {
            return format!("{}/root", self.drive_url());
        }
        format!("{}/root:/{}", self.drive_url(), encode_path(segments))
    }

    fn children_url(&self, parent: &[String]) -> String {
        if parent.is_empty() {
            return format!("{}/root/children", self.drive_url());
        }
        format!("{}:/children", self.path_url(parent))
    }

    async fn create_folder(&self, parent: &[String], name: &str) -> Result<()> {
        let response = self
            .client
            .post(self.children_url(parent))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "name": name,
                "folder": {},
                "@microsoft.graph.conflictBehavior": "fail",
            }))
            .send()
            .await?;

        match response.status() {
            // 并发创建时已存在
            StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(server_error(response).await),
        }
    }

    async fn simple_upload(
        &self,
        file: &FileRef,
        segments: &[String],
        on_progress: &ProgressCallback,
    ) -> Result<StoredFile> {
        on_progress(UploadProgress::new(UploadPhase::Uploading, 0, file.size, 0.0));

        let response = self
            .client
            .put(format!("{}:/content", self.path_url(segments)))
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, file.mime_type.as_str())
            .body(file.data.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let item: DriveItem = response.json().await?;
        Ok(item.into())
    }

    async fn session_upload(
        &self,
        file: &FileRef,
        segments: &[String],
        on_progress: &ProgressCallback,
    ) -> Result<StoredFile> {
        let total = file.size;
        on_progress(UploadProgress::new(UploadPhase::CreatingSession, 0, total, 0.0));

        let response = self
            .client
            .post(format!("{}:/createUploadSession", self.path_url(segments)))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "item": { "@microsoft.graph.conflictBehavior": "replace" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        let session: UploadSession = response.json().await?;

        let mut speed = SpeedCalculator::new(Duration::from_secs(5));
        speed.add_data_point(0);
        let mut offset = 0usize;
        let data = &file.data;

        while offset < data.len() {
            let end = (offset + self.chunk_size).min(data.len());
            tracing::debug!(offset, end, total, "uploading chunk");

            // 上传地址已经预签名，不带授权头
            let response = self
                .client
                .put(&session.upload_url)
                .header(reqwest::header::CONTENT_LENGTH, (end - offset).to_string())
                .header(
                    reqwest::header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", offset, end - 1, total),
                )
                .body(data.slice(offset..end))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let err = server_error(response).await;
                self.cancel_session(&session.upload_url).await;
                return Err(err);
            }

            offset = end;
            speed.add_data_point(offset as u64);
            tracing::debug!(
                uploaded = offset,
                eta = ?speed.estimate_eta(total.saturating_sub(offset as u64)),
                "chunk accepted"
            );
            on_progress(UploadProgress::new(UploadPhase::Uploading, offset as u64, total, speed.speed()));

            if status != StatusCode::ACCEPTED {
                let item: DriveItem = response.json().await?;
                return Ok(item.into());
            }
        }

        Err(QueueError::transport(format!(
            "Upload session for {} ended without a drive item",
            file.name
        )))
    }

    async fn cancel_session(&self, upload_url: &str) {
        if let Err(err) = self.client.delete(upload_url).send().await {
            tracing::debug!(error = %err, "failed to cancel upload session");
        }
    }

    async fn get_item(&self, id: &str) -> Result<DriveItem> {
        let response = self
            .client
            .get(format!("{}/items/{}", self.drive_url(), urlencoding::encode(id)))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteFileStore for GraphFileStore {
    fn is_available(&self) -> bool {
        !self.drive_id.is_empty() && !self.access_token.is_empty()
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Sharepoint
    }

    async fn ensure_folder(&self, path: &FolderPath) -> Result<()> {
        let segments = self.remote_segments(path);

        for depth in 1..=segments.len() {
            let current = &segments[..depth];
            let response = self
                .client
                .get(self.path_url(current))
                .bearer_auth(&self.access_token)
                .send()
                .await?;

            match response.status() {
                StatusCode::NOT_FOUND => {
                    tracing::debug!(folder = %current.join("/"), "creating folder");
                    self.create_folder(&segments[..depth - 1], &segments[depth - 1]).await?;
                }
                status if status.is_success() => {}
                _ => return Err(server_error(response).await),
            }
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
        let mut segments = self.remote_segments(path);
        segments.push(sanitize_segment(file_name));

        let stored = if file.size <= SIMPLE_UPLOAD_LIMIT {
            self.simple_upload(file, &segments, &on_progress).await?
        } else {
            self.session_upload(file, &segments, &on_progress).await?
        };

        on_progress(UploadProgress::complete(file.size));
        Ok(stored)
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/items/{}", self.drive_url(), urlencoding::encode(id)))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        Ok(())
    }

    async fn download_url(&self, id: &str) -> Result<String> {
        self.get_item(id)
            .await?
            .download_url
            .ok_or_else(|| QueueError::transport(format!("No download url for item {id}")))
    }

    async fn preview_url(&self, id: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/items/{}/preview", self.drive_url(), urlencoding::encode(id)))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        let link: PreviewLink = response.json().await?;
        Ok(link.get_url)
    }
}

/// Replace characters SharePoint rejects in file and folder names.
pub fn sanitize_segment(segment: &str) -> String {
    let replaced: String = segment
        .chars()
        .map(|c| match c {
            '"' | '*' | ':' | '<' | '>' | '?' | '/' | '\\' | '|' => '-',
            c => c,
        })
        .collect();
    replaced.trim().trim_end_matches('.').trim_end().to_string()
}

fn encode_path(segments: &[String]) -> String {
    segments
        .iter()
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn server_error(response: Response) -> QueueError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|err| format!("unreadable response body: {err}"));
    QueueError::server_error(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("B1L2M15 | BLM-A / BLM-B"), "B1L2M15 - BLM-A - BLM-B");
        assert_eq!(sanitize_segment(" Shop Drawings. "), "Shop Drawings");
        assert_eq!(sanitize_segment("a:b?c"), "a-b-c");
    }

    #[test]
    fn test_rejects_unaligned_chunks() {
        let config = SharePointConfig {
            chunk_size: 1000,
            ..Default::default()
        };
        assert!(matches!(GraphFileStore::new(&config), Err(QueueError::Config(_))));

        let config = SharePointConfig {
            graph_url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(GraphFileStore::new(&config), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_urls() {
        let store = GraphFileStore::new(&SharePointConfig {
            graph_url: "https://graph.example.com/v1.0/".into(),
            drive_id: "d1".into(),
            access_token: "t".into(),
            root_folder: Some("MODA".into()),
            ..Default::default()
        })
        .unwrap();

        let path = FolderPath {
            project: "Harbor View".into(),
            category: "Shops".into(),
            discipline: "Electrical".into(),
            module: None,
        };
        let segments = store.remote_segments(&path);
        assert_eq!(segments, vec!["MODA", "Harbor View", "Shops", "Electrical"]);
        assert_eq!(
            store.path_url(&segments[..2]),
            "https://graph.example.com/v1.0/drives/d1/root:/MODA/Harbor%20View"
        );
        assert_eq!(store.children_url(&[]), "https://graph.example.com/v1.0/drives/d1/root/children");
        assert!(store.is_available());
        assert_eq!(store.backend(), StorageBackend::Sharepoint);
    }

    #[test]
    fn test_unconfigured_store_is_unavailable() {
        let store = GraphFileStore::new(&SharePointConfig::default()).unwrap();
        assert!(!store.is_available());
    }
}
