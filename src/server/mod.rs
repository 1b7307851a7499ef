//! HTTP front of the receiver.
//!
//! One form endpoint takes both onboarding submissions and file uploads,
//! told apart by `form_type`. Finalised files are served back from
//! `/files/:id`.

use crate::config::{ReceiverConfig, StorageBackend};
use crate::errors::{OnboardingError, OnboardingResult};
use crate::mail::{LogMailer, Mailer, SmtpMailer};
use crate::receiver::{SessionRegistry, UploadReceiver};
use crate::storage::{is_valid_id, DriveStore, FsDrive, FsSheet, MemoryDrive, MemorySheet, SheetStore};
use crate::submission::SubmissionHandler;
use crate::types::{FormFields, FormType, SubmissionResponse, UploadRequest, UploadResponse};
use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    /// Onboarding submissions.
    pub submissions: Arc<SubmissionHandler>,
    /// File uploads.
    pub receiver: Arc<UploadReceiver>,
    /// Store serving finalised files.
    pub drive: Arc<dyn DriveStore>,
}

impl AppState {
    /// Wires handlers over the given collaborators.
    pub fn new(
        config: &ReceiverConfig,
        drive: Arc<dyn DriveStore>,
        sheets: Arc<dyn SheetStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.session_idle_timeout));
        Self {
            submissions: Arc::new(SubmissionHandler::new(config, drive.clone(), sheets, mailer)),
            receiver: Arc::new(UploadReceiver::new(drive.clone(), sessions)),
            drive,
        }
    }

    /// Builds storage and mail backends from configuration.
    pub async fn from_config(config: &ReceiverConfig) -> OnboardingResult<Self> {
        let link_base = config.link_base().to_string();

        let (drive, sheets): (Arc<dyn DriveStore>, Arc<dyn SheetStore>) = match &config.storage {
            StorageBackend::Memory => (
                Arc::new(MemoryDrive::new(config.root_container_id.clone(), link_base)),
                Arc::new(MemorySheet::new()),
            ),
            StorageBackend::Filesystem(dir) => (
                Arc::new(FsDrive::open(dir.clone(), &config.root_container_id, link_base).await?),
                Arc::new(FsSheet::open(dir.clone()).await?),
            ),
        };

        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp.clone())),
            None => Arc::new(LogMailer),
        };

        Ok(Self::new(config, drive, sheets, mailer))
    }
}

/// Error reply: `{status: "error", message}` with the category's status.
#[derive(Debug)]
pub struct ApiError(pub OnboardingError);

impl From<OnboardingError> for ApiError {
    fn from(err: OnboardingError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            error!(error = %self.0, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
        }
        error_reply(status, self.0.public_message())
    }
}

fn error_reply(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

/// Routes with the configured body ceiling and CORS policy.
pub fn router(state: AppState, config: &ReceiverConfig) -> Router {
    Router::new()
        .route("/", post(post_form))
        .route("/files/:id", get(get_file))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(&config.cors_origins))
        .with_state(state)
}

/// CORS policy for the browser form: any origin when `origins` is empty.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn post_form(
    State(state): State<AppState>,
    form: Result<Form<FormFields>, FormRejection>,
) -> Response {
    let fields = match form {
        Ok(Form(fields)) => fields,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable form body");
            return error_reply(rejection.status(), rejection.body_text());
        }
    };
    match dispatch(&state, &fields).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn dispatch(state: &AppState, fields: &FormFields) -> Result<Response, ApiError> {
    match FormType::from_fields(fields)? {
        FormType::Onboarding => {
            let folder_id = state.submissions.handle_fields(fields).await?;
            Ok(Json(SubmissionResponse::Success { folder_id }).into_response())
        }
        FormType::FileUpload => {
            let request = UploadRequest::from_fields(fields)?;
            let reply = state.receiver.handle(request).await?;
            Ok(Json(UploadResponse::from(reply)).into_response())
        }
    }
}

async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    if !is_valid_id(&file_id) {
        return Err(OnboardingError::file_not_found(file_id).into());
    }
    let public = state.drive.read_public(&file_id).await?;

    let content_type = public
        .file
        .content_type
        .parse::<mime::Mime>()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    let content_type = HeaderValue::from_str(content_type.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&content_disposition(&public.file.name))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        public.bytes,
    )
        .into_response())
}

// RFC 5987 attr-char keeps these unescaped.
const FILENAME_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `inline` disposition with a quoted ASCII fallback and an encoded UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(name, FILENAME_SET)
    )
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "upload_sessions": state.receiver.sessions().len(),
    }))
}

/// Serves on `listener` until `shutdown` resolves, sweeping idle upload
/// sessions in the background.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    config: &ReceiverConfig,
    shutdown: F,
) -> OnboardingResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweeper = state
        .receiver
        .sessions()
        .spawn_sweeper(config.sweep_interval);
    let app = router(state, config);

    if let Ok(addr) = listener.local_addr() {
        info!("Onboarding receiver listening on {}", addr);
    }
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| OnboardingError::network(format!("Server error: {}", e)));

    sweeper.abort();
    result
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(config: ReceiverConfig) -> OnboardingResult<()> {
    config.validate()?;
    let state = AppState::from_config(&config).await?;
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| OnboardingError::network(format!("Failed to bind {}: {}", config.bind_addr, e)))?;

    serve_with_shutdown(listener, state, &config, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MemoryMailer;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    struct TestServer {
        base: String,
        drive: Arc<MemoryDrive>,
        folder: String,
        http: reqwest::Client,
    }

    async fn spawn() -> TestServer {
        spawn_with(ReceiverConfig::builder()).await
    }

    async fn spawn_with(builder: crate::config::ReceiverConfigBuilder) -> TestServer {
        let config = builder
            .root_container_id("root")
            .max_body_bytes(1024)
            .build()
            .unwrap();
        let drive = Arc::new(MemoryDrive::new("root", "http://localhost:8080"));
        let folder = drive.create_container("root", "Acme_2024-01-01").await.unwrap();
        let state = AppState::new(
            &config,
            drive.clone(),
            Arc::new(MemorySheet::new()),
            Arc::new(MemoryMailer::new()),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state, &config);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            drive,
            folder,
            http: reqwest::Client::new(),
        }
    }

    impl TestServer {
        async fn post(&self, fields: &[(&str, &str)]) -> reqwest::Response {
            self.http
                .post(format!("{}/", self.base))
                .form(fields)
                .send()
                .await
                .unwrap()
        }

        async fn get(&self, path: &str) -> reqwest::Response {
            self.http
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_unknown_form_type() {
        let server = spawn().await;
        let response = server.post(&[("form_type", "survey")]).await;
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("Unsupported form type"));
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let server = spawn().await;
        let encoded = STANDARD.encode(b"%PDF-1.4 test");
        let response = server
            .post(&[
                ("form_type", "file_upload"),
                ("type", "amlPolicy"),
                ("index", "0"),
                ("folderId", server.folder.as_str()),
                ("filename", "policy.pdf"),
                ("contentType", "application/pdf"),
                ("file", encoded.as_str()),
            ])
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "success");
        let file_id = body["fileId"].as_str().unwrap().to_string();
        assert!(body["fileUrl"].as_str().unwrap().ends_with(&format!("/files/{}", file_id)));

        let response = server.get(&format!("/files/{}", file_id)).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "application/pdf"
        );
        assert_eq!(&response.bytes().await.unwrap()[..], b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn test_missing_folder_is_not_found() {
        let server = spawn().await;
        let response = server
            .post(&[
                ("form_type", "file_upload"),
                ("type", "amlPolicy"),
                ("index", "0"),
                ("folderId", "nope"),
                ("filename", "policy.pdf"),
                ("file", "AAAA"),
            ])
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unshared_file_is_not_served() {
        let server = spawn().await;
        let partial = server
            .drive
            .create_file(
                &server.folder,
                "x.partial",
                "application/pdf",
                bytes::Bytes::from_static(b"x"),
            )
            .await
            .unwrap();
        let response = server.get(&format!("/files/{}", partial.id)).await;
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let server = spawn().await;
        let big = "A".repeat(4 * 1024);
        let response = server
            .post(&[
                ("form_type", "file_upload"),
                ("folderId", server.folder.as_str()),
                ("file", big.as_str()),
            ])
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_content_disposition_escapes_name() {
        assert_eq!(
            content_disposition("articles_0.pdf"),
            "inline; filename=\"articles_0.pdf\"; filename*=UTF-8''articles_0.pdf"
        );
        assert_eq!(
            content_disposition("a\"b_0.pdf"),
            "inline; filename=\"a_b_0.pdf\"; filename*=UTF-8''a%22b_0.pdf"
        );
        assert_eq!(
            content_disposition("устав_0.pdf"),
            "inline; filename=\"______0.pdf\"; filename*=UTF-8''%D1%83%D1%81%D1%82%D0%B0%D0%B2_0.pdf"
        );
    }

    fn allow_origin(response: &reqwest::Response) -> Option<&str> {
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_browser_preflight_and_post() {
        let server = spawn().await;

        let preflight = server
            .http
            .request(reqwest::Method::OPTIONS, format!("{}/", server.base))
            .header("origin", "https://apply.example.com")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .send()
            .await
            .unwrap();
        assert!(preflight.status().is_success());
        assert_eq!(allow_origin(&preflight), Some("*"));

        let response = server
            .http
            .post(format!("{}/", server.base))
            .header("origin", "https://apply.example.com")
            .form(&[("form_type", "survey")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(allow_origin(&response), Some("*"));
    }

    #[tokio::test]
    async fn test_configured_origins_only() {
        let server =
            spawn_with(ReceiverConfig::builder().cors_origin("https://apply.example.com")).await;

        let allowed = server
            .http
            .get(format!("{}/health", server.base))
            .header("origin", "https://apply.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(allow_origin(&allowed), Some("https://apply.example.com"));

        let other = server
            .http
            .get(format!("{}/health", server.base))
            .header("origin", "https://evil.example.net")
            .send()
            .await
            .unwrap();
        assert_eq!(allow_origin(&other), None);
    }

    #[tokio::test]
    async fn test_health() {
        let server = spawn().await;
        let response = server.get("/health").await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }
}
