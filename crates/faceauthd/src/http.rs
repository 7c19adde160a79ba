//! HTTP surface: `/register`, `/authenticate`, `/health`.

use crate::engine::EngineHandle;
use crate::error::{ApiError, ApiResult, Operation};
use crate::staging::StagedUpload;
use crate::store::{FaceStore, UpsertOutcome};
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use faceauth_core::{FeatureVector, Matcher};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared request-handling state. The store is injected; nothing is global.
pub struct AppState {
    pub store: Arc<dyn FaceStore>,
    pub engine: EngineHandle,
    pub matcher: Box<dyn Matcher>,
    pub tolerance: f32,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/register", post(register))
        .route("/authenticate", post(authenticate))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Uploaded image file.
struct ImageUpload {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

/// Fields of a register/authenticate form. Unknown fields are ignored.
#[derive(Default)]
struct FaceForm {
    user_id: Option<String>,
    image: Option<ImageUpload>,
}

impl FaceForm {
    async fn read(
        form: Result<Multipart, MultipartRejection>,
        limit: usize,
    ) -> ApiResult<Self> {
        let mut multipart = form.map_err(|e| ApiError::InvalidForm(e.body_text()))?;
        let field_error = |e: MultipartError| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::UploadTooLarge(limit)
            } else {
                ApiError::InvalidForm(e.body_text())
            }
        };

        let mut parsed = FaceForm::default();
        while let Some(field) = multipart.next_field().await.map_err(field_error)? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("userId") => parsed.user_id = Some(field.text().await.map_err(field_error)?),
                Some("image") => {
                    let file_name = field.file_name().map(str::to_string);
                    let bytes = field.bytes().await.map_err(field_error)?;
                    if !bytes.is_empty() {
                        parsed.image = Some(ImageUpload {
                            file_name,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                other => tracing::debug!(field = ?other, "ignoring form field"),
            }
        }
        Ok(parsed)
    }
}

impl AppState {
    /// Stage `image`, encode it, and remove the staged file before returning.
    async fn encode(&self, operation: Operation, image: &ImageUpload) -> ApiResult<FeatureVector> {
        let kind = match operation {
            Operation::Registration => "register",
            Operation::Authentication => "auth",
        };
        let staged = StagedUpload::write(&self.upload_dir, kind, image.file_name.as_deref(), &image.bytes)
            .await
            .map_err(|e| ApiError::processing(operation, e))?;

        let result = self.engine.encode(staged.path().to_path_buf()).await;
        drop(staged);
        result.map_err(|e| ApiError::from_engine(operation, e))
    }
}

/// `POST /register`: multipart `userId` + `image`.
async fn register(
    State(state): State<Arc<AppState>>,
    form: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Value>> {
    let operation = Operation::Registration;
    let form = FaceForm::read(form, state.max_upload_bytes).await?;

    let user_id = form
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ApiError::MissingUserId)?;
    let image = form.image.ok_or(ApiError::MissingImage)?;

    let vector = state.encode(operation, &image).await?;
    let outcome = state
        .store
        .upsert(&user_id, &vector)
        .await
        .map_err(ApiError::Storage)?;

    tracing::info!(user_id = %user_id, ?outcome, dim = vector.len(), "face registered");
    let message = match outcome {
        UpsertOutcome::Inserted => "Face registered successfully",
        UpsertOutcome::Updated => "Face updated successfully",
    };
    Ok(Json(json!({ "message": message })))
}

/// `POST /authenticate`: multipart `image`; answers with the matched `userId`.
async fn authenticate(
    State(state): State<Arc<AppState>>,
    form: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Value>> {
    let operation = Operation::Authentication;
    let form = FaceForm::read(form, state.max_upload_bytes).await?;
    let image = form.image.ok_or(ApiError::MissingImage)?;

    let query = state.encode(operation, &image).await?;
    let candidates = state
        .store
        .all_entries()
        .await
        .map_err(|e| ApiError::processing(operation, e))?;
    if candidates.is_empty() {
        return Err(ApiError::NoRegistrations);
    }

    match state.matcher.find_match(&query, &candidates, state.tolerance) {
        Some(user_id) => {
            tracing::info!(user_id, candidates = candidates.len(), "face authenticated");
            Ok(Json(json!({ "userId": user_id })))
        }
        None => {
            tracing::info!(candidates = candidates.len(), tolerance = state.tolerance, "no registration within tolerance");
            Err(ApiError::NotRecognized)
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::store::{MemoryFaceStore, StoreError};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use faceauth_core::{EncodeError, FaceEncoder, FirstMatch, Registration};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const BOUNDARY: &str = "faceauth-test-boundary";

    /// Reads the image as text: `none`, `two`, or comma-separated floats.
    struct TextEncoder;

    impl FaceEncoder for TextEncoder {
        fn encode(&mut self, image: &[u8]) -> Result<FeatureVector, EncodeError> {
            let text = String::from_utf8_lossy(image);
            match text.trim() {
                "none" => Err(EncodeError::NoFaceDetected),
                "two" => Err(EncodeError::MultipleFacesDetected { count: 2 }),
                values => Ok(FeatureVector::new(
                    values.split(',').map(|v| v.trim().parse().unwrap()).collect(),
                )),
            }
        }
    }

    /// Fails every call with an I/O error; counts upsert attempts.
    #[derive(Default)]
    struct FailingStore {
        upserts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FaceStore for FailingStore {
        async fn upsert(&self, _: &str, _: &FeatureVector) -> Result<UpsertOutcome, StoreError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn all_entries(&self) -> Result<Vec<Registration>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
    }

    struct Harness {
        app: Router,
        store: Arc<MemoryFaceStore>,
        upload_dir: tempfile::TempDir,
    }

    fn app(store: Arc<dyn FaceStore>, upload_dir: &Path, max_upload_bytes: usize) -> Router {
        let state = AppState {
            store,
            engine: spawn_engine(Box::new(TextEncoder), 4).unwrap(),
            matcher: Box::new(FirstMatch),
            tolerance: 0.5,
            upload_dir: upload_dir.to_path_buf(),
            max_upload_bytes,
        };
        router(Arc::new(state))
    }

    fn harness_with_limit(max_upload_bytes: usize) -> Harness {
        let upload_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryFaceStore::new());
        Harness {
            app: app(store.clone(), upload_dir.path(), max_upload_bytes),
            store,
            upload_dir,
        }
    }

    fn harness() -> Harness {
        harness_with_limit(1024 * 1024)
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                    );
                }
                Part::File(name, file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn register(h: &Harness, user: &str, image: &str) -> (StatusCode, Value) {
        let req = multipart_request(
            "/register",
            &[Part::Text("userId", user), Part::File("image", "face.jpg", image.as_bytes())],
        );
        send(&h.app, req).await
    }

    async fn authenticate(h: &Harness, image: &str) -> (StatusCode, Value) {
        let req = multipart_request("/authenticate", &[Part::File("image", "probe.png", image.as_bytes())]);
        send(&h.app, req).await
    }

    fn staged_files(h: &Harness) -> usize {
        std::fs::read_dir(h.upload_dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let h = harness();
        let (status, body) = register(&h, "alice", "0.1,0.2,0.3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Face registered successfully" }));

        let (status, body) = authenticate(&h, "0.1,0.2,0.3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "userId": "alice" }));

        // Near-duplicate within tolerance.
        let (status, body) = authenticate(&h, "0.15,0.2,0.3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "userId": "alice" }));

        assert_eq!(staged_files(&h), 0);
    }

    #[tokio::test]
    async fn test_reregister_updates_single_record() {
        let h = harness();
        register(&h, "alice", "0.0,0.0").await;
        let (status, body) = register(&h, "alice", "5.0,5.0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Face updated successfully" }));

        let all = h.store.all_entries().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].vector.as_slice(), &[5.0, 5.0]);

        let (status, _) = authenticate(&h, "0.0,0.0").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_authenticate_empty_store_is_404() {
        let h = harness();
        let (status, body) = authenticate(&h, "0.1,0.2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No registered faces found in the database");
        assert_eq!(staged_files(&h), 0);
    }

    #[tokio::test]
    async fn test_authenticate_outside_tolerance_is_401() {
        let h = harness();
        register(&h, "alice", "0.0,0.0").await;
        let (status, body) = authenticate(&h, "3.0,4.0").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Face not recognized");
    }

    #[tokio::test]
    async fn test_authenticate_returns_first_registered_within_tolerance() {
        let h = harness();
        register(&h, "first", "0.4,0.0").await;
        register(&h, "second", "0.0,0.0").await;
        let (status, body) = authenticate(&h, "0.0,0.0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "userId": "first" }));
    }

    #[tokio::test]
    async fn test_register_multiple_faces_is_400_and_stores_nothing() {
        let h = harness();
        let (status, body) = register(&h, "alice", "two").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "Multiple faces detected. Please submit an image with only one face."
        );
        assert!(h.store.all_entries().await.unwrap().is_empty());
        assert_eq!(staged_files(&h), 0);
    }

    #[tokio::test]
    async fn test_register_existing_user_multiple_faces_keeps_old_vector() {
        let h = harness();
        register(&h, "alice", "1.0,1.0").await;
        let (status, _) = register(&h, "alice", "two").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let all = h.store.all_entries().await.unwrap();
        assert_eq!(all[0].vector.as_slice(), &[1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_no_face_is_400() {
        let h = harness();
        let (status, body) = register(&h, "alice", "none").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No face detected in the image");

        let (status, body) = authenticate(&h, "none").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No face detected in the image");
        assert_eq!(staged_files(&h), 0);
    }

    #[tokio::test]
    async fn test_register_missing_fields() {
        let h = harness();
        let req = multipart_request("/register", &[Part::File("image", "a.jpg", b"0.1")]);
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "User ID is required");

        let req = multipart_request("/register", &[Part::Text("userId", "   ")]);
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "User ID is required");

        let req = multipart_request("/register", &[Part::Text("userId", "alice")]);
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Image file is required");

        let req = multipart_request(
            "/register",
            &[Part::Text("userId", "alice"), Part::File("image", "empty.jpg", b"")],
        );
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Image file is required");
    }

    #[tokio::test]
    async fn test_authenticate_missing_image() {
        let h = harness();
        let req = multipart_request("/authenticate", &[Part::Text("userId", "alice")]);
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Image file is required");
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_400() {
        let h = harness();
        let req = Request::builder()
            .method("POST")
            .uri("/authenticate")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Invalid multipart form"));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_413() {
        let h = harness_with_limit(256);
        let big = vec![b'1'; 4096];
        let req = multipart_request(
            "/register",
            &[Part::Text("userId", "alice"), Part::File("image", "big.jpg", &big)],
        );
        let (status, _) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(h.store.all_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let h = harness();
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Not found");
    }

    #[tokio::test]
    async fn test_missing_upload_dir_is_500() {
        let mut h = harness();
        let gone = h.upload_dir.path().join("removed");
        h.app = app(h.store.clone(), &gone, 1024);
        let (status, body) = register(&h, "alice", "0.1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Error processing face registration:"));
    }

    #[tokio::test]
    async fn test_store_failures_are_500() {
        let mut h = harness();
        let failing = Arc::new(FailingStore::default());
        h.app = app(failing.clone(), h.upload_dir.path(), 1024 * 1024);

        let (status, body) = register(&h, "alice", "0.1,0.2").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "message": "Failed to store face data" }));
        assert_eq!(failing.upserts.load(Ordering::SeqCst), 1);
        assert!(h.store.all_entries().await.unwrap().is_empty());
        assert_eq!(staged_files(&h), 0);

        let (status, body) = authenticate(&h, "0.1,0.2").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Error processing face authentication:"));
        assert_eq!(staged_files(&h), 0);
    }
}
