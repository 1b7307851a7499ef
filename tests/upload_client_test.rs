//! Upload client against a mocked receiver over real HTTP.

use integrations_onboarding::errors::{OnboardingError, UploadError};
use integrations_onboarding::transport::ReqwestTransport;
use integrations_onboarding::{ClientConfig, UploadClient, UploadFile};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KIB: usize = 1024;

fn client(server: &MockServer) -> UploadClient {
    let config = ClientConfig::builder()
        .endpoint(format!("{}/", server.uri()))
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap();
    let transport = ReqwestTransport::with_timeout(Some(Duration::from_secs(5))).unwrap();
    UploadClient::new(&config, Arc::new(transport))
}

fn file(len: usize) -> UploadFile {
    let bytes: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    UploadFile::new("register.xlsx", "application/vnd.ms-excel", bytes)
}

async fn sent_forms(server: &MockServer) -> Vec<HashMap<String, String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_urlencoded::from_bytes(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_whole_file_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "fileId": "file-1",
            "fileUrl": "https://files.test/files/file-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server)
        .upload(&file(50 * KIB), "shareholderRegister", 2, "folder-7")
        .await
        .unwrap();

    assert_eq!(outcome.file_id, "file-1");
    assert_eq!(outcome.chunks, 1);

    let forms = sent_forms(&server).await;
    let form = &forms[0];
    assert_eq!(form["form_type"], "file_upload");
    assert_eq!(form["type"], "shareholderRegister");
    assert_eq!(form["index"], "2");
    assert_eq!(form["folderId"], "folder-7");
    assert_eq!(form["filename"], "register.xlsx");
    assert!(!form.contains_key("chunk_index"));
    assert!(!form.contains_key("total_chunks"));
    assert!(!form.contains_key("file_id"));
}

#[tokio::test]
async fn test_chunked_upload_follows_continuation_protocol() {
    let server = MockServer::start().await;
    for (index, url) in [("0", None), ("1", None), ("2", Some("https://files.test/files/file-9"))] {
        let mut body = json!({ "status": "success", "fileId": "file-9" });
        if let Some(url) = url {
            body["fileUrl"] = json!(url);
        }
        Mock::given(method("POST"))
            .and(body_string_contains(format!("chunk_index={}", index)))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let outcome = client(&server)
        .upload(&file(700 * KIB), "kycDocuments", 0, "folder-7")
        .await
        .unwrap();
    assert_eq!(outcome.chunks, 3);
    assert_eq!(outcome.file_url, "https://files.test/files/file-9");

    let forms = sent_forms(&server).await;
    assert_eq!(forms.len(), 3);
    assert!(!forms[0].contains_key("file_id"));
    for (i, form) in forms.iter().enumerate() {
        assert_eq!(form["chunk_index"], i.to_string());
        assert_eq!(form["total_chunks"], "3");
    }
    assert_eq!(forms[1]["file_id"], "file-9");
    assert_eq!(forms[2]["file_id"], "file-9");
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "fileId": "file-2",
            "fileUrl": "https://files.test/files/file-2"
        })))
        .mount(&server)
        .await;

    let outcome = client(&server)
        .upload(&file(KIB), "amlPolicy", 0, "folder-7")
        .await
        .unwrap();
    assert_eq!(outcome.file_id, "file-2");
    assert_eq!(sent_forms(&server).await.len(), 3);
}

#[tokio::test]
async fn test_three_failures_abort_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("chunk_index=0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "fileId": "file-3"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("chunk_index=1"))
        .respond_with(ResponseTemplate::new(504).set_body_json(json!({
            "status": "error",
            "message": "Upstream timeout while storing chunk"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server)
        .upload(&file(900 * KIB), "articles", 0, "folder-7")
        .await
        .unwrap_err();

    match err {
        OnboardingError::Upload(UploadError::RetriesExhausted {
            chunk_index,
            attempts,
            source,
            ..
        }) => {
            assert_eq!(chunk_index, 1);
            assert_eq!(attempts, 3);
            assert!(source.to_string().contains("Upstream timeout"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let forms = sent_forms(&server).await;
    assert!(forms.iter().all(|f| f["chunk_index"] != "2"));
}

#[tokio::test]
async fn test_storage_failure_fails_at_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(507).set_body_json(json!({
            "status": "error",
            "message": "Storage error: Storage quota exceeded: full (limit: 10, used: 10)"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .upload(&file(KIB), "articles", 0, "folder-7")
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert!(err.to_string().contains("507"));
    assert_eq!(sent_forms(&server).await.len(), 1);
}
