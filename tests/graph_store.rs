//! SharePoint store against a mocked Graph API.

use std::sync::Arc;
use parking_lot::Mutex;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use moda_upload::config::SharePointConfig;
use moda_upload::core::{ProgressCallback, UploadPhase, UploadProgress};
use moda_upload::drawings::FolderPath;
use moda_upload::{FileRef, GraphFileStore, QueueError, RemoteFileStore};

fn store(server: &MockServer) -> GraphFileStore {
    GraphFileStore::new(&SharePointConfig {
        graph_url: server.uri(),
        drive_id: "d1".to_string(),
        access_token: "token".to_string(),
        ..Default::default()
    })
    .expect("valid config")
}

fn folder(module: Option<&str>) -> FolderPath {
    FolderPath {
        project: "Harbor".to_string(),
        category: "Shops".to_string(),
        discipline: match module {
            Some(_) => "Module Packages".to_string(),
            None => "Electrical".to_string(),
        },
        module: module.map(str::to_string),
    }
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<UploadProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |progress: UploadProgress| sink.lock().push(progress));
    (callback, seen)
}

fn drive_item(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "webUrl": format!("https://tenant.sharepoint.com/{id}"),
        "@microsoft.graph.downloadUrl": format!("https://download.example.com/{id}"),
    })
}

#[tokio::test]
async fn test_ensure_folder_creates_missing_levels() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/root:/Harbor"))
        .and(header("Authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "f1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drives/d1/root:/Harbor/Shops"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drives/d1/root:/Harbor:/children"))
        .and(body_json(serde_json::json!({
            "name": "Shops",
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "f2" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drives/d1/root:/Harbor/Shops/Electrical"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    // 另一个上传者刚刚创建了同名目录
    Mock::given(method("POST"))
        .and(path("/drives/d1/root:/Harbor/Shops:/children"))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    store(&server).ensure_folder(&folder(None)).await.unwrap();
}

#[tokio::test]
async fn test_ensure_folder_surfaces_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/root:/Harbor"))
        .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
        .mount(&server)
        .await;

    let err = store(&server).ensure_folder(&folder(None)).await.unwrap_err();
    assert!(matches!(err, QueueError::Server { status_code: 403, ref message } if message == "access denied"));
}

#[tokio::test]
async fn test_small_file_uses_simple_upload() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/drives/d1/root:/Harbor/Shops/Module%20Packages/B1L2M15%20-%20BLM-A/pkg_v1.0.pdf:/content"))
        .and(header("Content-Type", "application/pdf"))
        .respond_with(ResponseTemplate::new(201).set_body_json(drive_item("item-1")))
        .expect(1)
        .mount(&server)
        .await;

    let (callback, seen) = recorder();
    let file = FileRef::from_bytes("package.pdf", vec![1u8; 2048]);
    let stored = store(&server)
        .upload_file(&file, &folder(Some("B1L2M15 | BLM-A")), "pkg_v1.0.pdf", callback)
        .await
        .unwrap();

    assert_eq!(stored.id, "item-1");
    assert_eq!(stored.web_url, "https://tenant.sharepoint.com/item-1");
    assert_eq!(stored.download_url.as_deref(), Some("https://download.example.com/item-1"));

    let seen = seen.lock();
    assert_eq!(seen.last().map(|p| p.phase), Some(UploadPhase::Complete));
    assert_eq!(seen.last().map(|p| p.percent), Some(100.0));
}

#[tokio::test]
async fn test_large_file_uploads_in_chunks() {
    let server = MockServer::start().await;
    let session_url = format!("{}/upload/session-1", server.uri());

    Mock::given(method("POST"))
        .and(path("/drives/d1/root:/Harbor/Shops/Electrical/big.bin:/createUploadSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "uploadUrl": session_url })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .and(header("Content-Range", "bytes 0-3276799/4718592"))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
            "nextExpectedRanges": ["3276800-"]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/session-1"))
        .and(header("Content-Range", "bytes 3276800-4718591/4718592"))
        .respond_with(ResponseTemplate::new(201).set_body_json(drive_item("item-2")))
        .expect(1)
        .mount(&server)
        .await;

    let (callback, seen) = recorder();
    let file = FileRef::from_bytes("big.bin", vec![0u8; 4718592]);
    let stored = store(&server)
        .upload_file(&file, &folder(None), "big.bin", callback)
        .await
        .unwrap();
    assert_eq!(stored.id, "item-2");

    let phases: Vec<UploadPhase> = seen.lock().iter().map(|p| p.phase).collect();
    assert_eq!(
        phases,
        vec![
            UploadPhase::CreatingSession,
            UploadPhase::Uploading,
            UploadPhase::Uploading,
            UploadPhase::Complete,
        ]
    );
    assert_eq!(seen.lock()[1].bytes_uploaded, 3276800);
}

#[tokio::test]
async fn test_upload_error_message_passes_through() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/drives/d1/root:/Harbor/Shops/Electrical/E-101.pdf:/content"))
        .respond_with(ResponseTemplate::new(507).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let (callback, _) = recorder();
    let file = FileRef::from_bytes("E-101.pdf", vec![1u8; 16]);
    let err = store(&server)
        .upload_file(&file, &folder(None), "E-101.pdf", callback)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Server error: status code 507, message: quota exceeded");
}

#[tokio::test]
async fn test_item_operations() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/items/item-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_item("item-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drives/d1/items/item-1/preview"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "getUrl": "https://preview.example.com/item-1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/drives/d1/items/item-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/drives/d1/items/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("itemNotFound"))
        .mount(&server)
        .await;

    let store = store(&server);
    assert_eq!(store.download_url("item-1").await.unwrap(), "https://download.example.com/item-1");
    assert_eq!(store.preview_url("item-1").await.unwrap(), "https://preview.example.com/item-1");
    store.delete_file("item-1").await.unwrap();
    assert!(matches!(
        store.delete_file("missing").await,
        Err(QueueError::Server { status_code: 404, .. })
    ));
}
