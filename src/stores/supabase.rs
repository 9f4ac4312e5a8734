//! Drawing metadata in Supabase tables, spoken to over PostgREST.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use crate::config::SupabaseConfig;
use crate::core::{MetadataStore, QueueError, Result};
use crate::drawings::model::{
    ActivityEntry,
    Drawing,
    DrawingVersion,
    Folder,
    NewDrawing,
    NewFolder,
    NewVersion,
};

const DRAWINGS: &str = "drawings";
const VERSIONS: &str = "drawing_versions";
const FOLDERS: &str = "drawing_folders";
const ACTIVITY: &str = "drawing_activity";

#[derive(Debug, Clone)]
pub struct RestMetadataStore {
    client: Client,
    rest_url: String,
    api_key: String,
}

impl RestMetadataStore {
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        Url::parse(&config.rest_url)
            .map_err(|_| QueueError::Config(format!("Invalid url: {:?}", config.rest_url)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn table(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, filters: &[(&str, String)]) -> Result<Vec<T>> {
        let response = self
            .authorized(self.client.get(self.table(table)))
            .query(filters)
            .send()
            .await?;

        let response = check(table, response).await?;
        Ok(response.json().await?)
    }

    /// Insert one row and read it back.
    async fn insert<B: Serialize, T: DeserializeOwned>(&self, table: &str, row: &B) -> Result<T> {
        let response = self
            .authorized(self.client.post(self.table(table)))
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;

        let response = check(table, response).await?;
        let rows: Vec<T> = response.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| QueueError::metadata(format!("{table}: insert returned no rows")))
    }
}

#[async_trait]
impl MetadataStore for RestMetadataStore {
    async fn find_drawing(&self, project_id: &str, folder_id: &str, name: &str) -> Result<Option<Drawing>> {
        let rows: Vec<Drawing> = self
            .select(
                DRAWINGS,
                &[
                    ("project_id", eq(project_id)),
                    ("folder_id", eq(folder_id)),
                    ("name", eq(name)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_drawing(&self, drawing: NewDrawing) -> Result<Drawing> {
        self.insert(DRAWINGS, &drawing).await
    }

    async fn list_versions(&self, drawing_id: &str) -> Result<Vec<DrawingVersion>> {
        self.select(
            VERSIONS,
            &[
                ("drawing_id", eq(drawing_id)),
                ("order", "uploaded_at.asc".to_string()),
            ],
        )
        .await
    }

    async fn create_version(&self, version: NewVersion) -> Result<DrawingVersion> {
        self.insert(VERSIONS, &version).await
    }

    async fn find_folder(&self, project_id: &str, parent_id: Option<&str>, name: &str) -> Result<Option<Folder>> {
        let parent = match parent_id {
            Some(parent_id) => eq(parent_id),
            None => "is.null".to_string(),
        };
        let rows: Vec<Folder> = self
            .select(
                FOLDERS,
                &[
                    ("project_id", eq(project_id)),
                    ("parent_id", parent),
                    ("name", eq(name)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_folder(&self, folder: NewFolder) -> Result<Folder> {
        self.insert(FOLDERS, &folder).await
    }

    async fn log_activity(&self, entry: ActivityEntry) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.table(ACTIVITY)))
            .header("Prefer", "return=minimal")
            .json(&entry)
            .send()
            .await?;

        check(ACTIVITY, response).await?;
        Ok(())
    }
}

/// PostgREST equality filter.
fn eq(value: &str) -> String {
    format!("eq.{value}")
}

async fn check(table: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|err| format!("unreadable response body: {err}"));
    tracing::debug!(table, status = status.as_u16(), body = %body, "metadata request rejected");
    Err(QueueError::server_error(status.as_u16(), format!("{table}: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_url() {
        let config = SupabaseConfig {
            rest_url: "https://example.supabase.co/rest/v1/".into(),
            api_key: "anon".into(),
            ..Default::default()
        };
        let store = RestMetadataStore::new(&config).unwrap();
        assert_eq!(store.table(DRAWINGS), "https://example.supabase.co/rest/v1/drawings");

        assert!(matches!(
            RestMetadataStore::new(&SupabaseConfig::default()),
            Err(QueueError::Config(_))
        ));
    }

    #[test]
    fn test_filters() {
        assert_eq!(eq("Module Packages"), "eq.Module Packages");
    }
}
