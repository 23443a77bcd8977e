//! AI provider gateway
//!
//! One operation-shaped contract (`describe` / `locate`) over the three
//! subprocess backends. The gateway never touches photo state: it returns an
//! [`AiResult`] for the caller to merge.

pub mod prompt;
pub mod provider;
pub mod response;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tagiato_common::config::EnrichConfig;
use tagiato_common::{AiOperation, GpsCoordinates};
use thiserror::Error;

use crate::models::{AiResult, Photo, TaskError, TaskErrorKind};

pub use provider::{available_providers, is_available, ProviderConfig, DEFAULT_TIMEOUT};

/// Gateway errors
#[derive(Debug, Error)]
pub enum AiError {
    /// Backend exceeded the hard timeout
    #[error("AI backend timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Backend process could not be started
    #[error("Failed to start AI backend {program}: {message}")]
    Spawn { program: String, message: String },

    /// Backend exited unsuccessfully
    #[error("AI backend failed (exit code {code:?}): {stderr}")]
    BackendFailed { code: Option<i32>, stderr: String },

    /// Output matched none of the JSON extraction strategies
    #[error("Unparseable AI response: {excerpt}")]
    Unparseable { excerpt: String },

    /// No image available for a request that needs one
    #[error("Thumbnail unavailable: {0}")]
    ThumbnailUnavailable(String),
}

impl AiError {
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            AiError::Timeout { .. } => TaskErrorKind::Timeout,
            AiError::Spawn { .. } => TaskErrorKind::SpawnFailed,
            AiError::BackendFailed { .. } => TaskErrorKind::BackendFailed,
            AiError::Unparseable { .. } => TaskErrorKind::UnparseableResponse,
            AiError::ThumbnailUnavailable(_) => TaskErrorKind::ThumbnailUnavailable,
        }
    }
}

impl From<AiError> for TaskError {
    fn from(err: AiError) -> Self {
        TaskError::new(err.kind(), err.to_string())
    }
}

/// Inputs for one describe/locate invocation
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    pub operation: AiOperation,
    pub filename: String,
    /// Thumbnail handed to the backend
    pub image_path: Option<PathBuf>,
    pub include_image: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub user_hint: Option<String>,
    /// Effective GPS (describe context)
    pub gps: Option<GpsCoordinates>,
    pub location_name: Option<String>,
    pub place_name: Option<String>,
    pub nearby_descriptions: Vec<String>,
}

impl AiRequest {
    pub fn new(operation: AiOperation, filename: impl Into<String>) -> Self {
        Self {
            operation,
            filename: filename.into(),
            image_path: None,
            include_image: true,
            timestamp: None,
            user_hint: None,
            gps: None,
            location_name: None,
            place_name: None,
            nearby_descriptions: Vec::new(),
        }
    }

    /// Request pre-filled from the photo's current fields
    ///
    /// Locate prompts carry only the timestamp; the position context would
    /// bias the model towards the value it is asked to verify.
    pub fn for_photo(operation: AiOperation, photo: &Photo) -> Self {
        let mut request = Self::new(operation, photo.filename.clone());
        request.timestamp = photo.timestamp;
        if operation == AiOperation::Describe {
            request.gps = photo.effective_gps().map(|r| r.gps);
            request.location_name = photo.location_name.clone();
            request.place_name = photo
                .place_name
                .clone()
                .or_else(|| photo.matched_location.as_ref().and_then(|m| m.place_name.clone()));
        }
        request
    }

    pub fn with_user_hint(mut self, hint: Option<String>) -> Self {
        self.user_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }
}

/// Seam between orchestration and the AI backends
#[async_trait]
pub trait PhotoAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AiRequest) -> Result<AiResult, AiError>;
}

/// Subprocess-backed gateway with one backend configuration per operation
#[derive(Debug, Clone)]
pub struct AiGateway {
    describe: ProviderConfig,
    locate: ProviderConfig,
}

impl AiGateway {
    pub fn new(describe: ProviderConfig, locate: ProviderConfig) -> Self {
        Self { describe, locate }
    }

    pub fn from_config(config: &EnrichConfig) -> Self {
        Self::new(
            ProviderConfig::from_settings(&config.describe),
            ProviderConfig::from_settings(&config.locate),
        )
    }

    pub fn config_for(&self, operation: AiOperation) -> &ProviderConfig {
        match operation {
            AiOperation::Describe => &self.describe,
            AiOperation::Locate => &self.locate,
        }
    }

    /// Exact prompt text that `analyze` would send
    pub fn preview_prompt(&self, request: &AiRequest) -> String {
        let config = self.config_for(request.operation);
        prompt::build_prompt(
            request,
            config.prompt.as_deref(),
            provider::image_in_prompt(config.kind),
        )
    }

    /// Run one operation against an explicit backend configuration
    pub async fn invoke(&self, request: &AiRequest, config: &ProviderConfig) -> Result<AiResult, AiError> {
        let image = if request.include_image {
            let path = request.image_path.as_deref().ok_or_else(|| {
                AiError::ThumbnailUnavailable(format!("no image prepared for {}", request.filename))
            })?;
            if !path.exists() {
                return Err(AiError::ThumbnailUnavailable(path.display().to_string()));
            }
            Some(path)
        } else {
            None
        };

        let prompt = prompt::build_prompt(
            request,
            config.prompt.as_deref(),
            provider::image_in_prompt(config.kind),
        );
        let raw = provider::run_backend(config, &prompt, image).await?;
        let result = response::parse_response(request.operation, &raw)?;

        tracing::info!(
            filename = %request.filename,
            operation = %request.operation,
            empty = result.empty,
            confidence = ?result.confidence,
            "AI response normalized"
        );
        Ok(result)
    }

    pub async fn describe(&self, request: &AiRequest) -> Result<AiResult, AiError> {
        self.invoke(request, &self.describe).await
    }

    pub async fn locate(&self, request: &AiRequest) -> Result<AiResult, AiError> {
        self.invoke(request, &self.locate).await
    }
}

#[async_trait]
impl PhotoAnalyzer for AiGateway {
    async fn analyze(&self, request: &AiRequest) -> Result<AiResult, AiError> {
        self.invoke(request, self.config_for(request.operation)).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;
    use tagiato_common::config::ProviderKind;
    use tempfile::TempDir;

    /// Executable shell script standing in for a backend CLI
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn gateway_with(binary: PathBuf, timeout: Duration) -> AiGateway {
        let config = ProviderConfig::new(ProviderKind::Claude)
            .with_binary(binary)
            .with_timeout(timeout);
        AiGateway::new(config.clone(), config)
    }

    fn text_only(operation: AiOperation) -> AiRequest {
        let mut request = AiRequest::new(operation, "a.jpg");
        request.include_image = false;
        request
    }

    #[tokio::test]
    async fn test_fenced_locate_response() {
        let dir = TempDir::new().unwrap();
        let bin = script(
            dir.path(),
            "claude",
            r#"printf '```json\n{"gps": null, "location_name": "Eiffel Tower", "confidence": "medium"}\n```\n'"#,
        );
        let gateway = gateway_with(bin, Duration::from_secs(10));

        let result = gateway.locate(&text_only(AiOperation::Locate)).await.unwrap();
        assert!(!result.empty);
        assert!(result.refined_gps.is_none());
        assert_eq!(result.location_name.as_deref(), Some("Eiffel Tower"));
        assert_eq!(result.confidence.as_deref(), Some("medium"));
    }

    #[tokio::test]
    async fn test_prompt_is_last_argument() {
        let dir = TempDir::new().unwrap();
        // Echo the final argument back inside a JSON description
        let bin = script(
            dir.path(),
            "claude",
            r#"for last; do :; done; case "$last" in *"The user adds: tower"*) echo '{"description": "hint seen"}';; *) echo '{"description": ""}';; esac"#,
        );
        let gateway = gateway_with(bin, Duration::from_secs(10));

        let request = text_only(AiOperation::Describe).with_user_hint(Some("tower".to_string()));
        let result = gateway.describe(&request).await.unwrap();
        assert_eq!(result.description.as_deref(), Some("hint seen"));
    }

    #[tokio::test]
    async fn test_timeout_is_distinguished() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "claude", "sleep 5");
        let gateway = gateway_with(bin, Duration::from_millis(200));

        let err = gateway.analyze(&text_only(AiOperation::Describe)).await.unwrap_err();
        assert!(matches!(err, AiError::Timeout { .. }));
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn test_nonzero_exit_and_garbage_output() {
        let dir = TempDir::new().unwrap();
        let failing = script(dir.path(), "failing", "echo 'quota exceeded' >&2; exit 3");
        let err = gateway_with(failing, Duration::from_secs(10))
            .analyze(&text_only(AiOperation::Describe))
            .await
            .unwrap_err();
        match err {
            AiError::BackendFailed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "quota exceeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let garbage = script(dir.path(), "garbage", "echo 'I am unable to see images.'");
        let err = gateway_with(garbage, Duration::from_secs(10))
            .analyze(&text_only(AiOperation::Describe))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TaskErrorKind::UnparseableResponse);
    }

    #[tokio::test]
    async fn test_missing_thumbnail() {
        let gateway = gateway_with(PathBuf::from("/bin/true"), Duration::from_secs(1));

        let request = AiRequest::new(AiOperation::Describe, "a.jpg");
        let err = gateway.analyze(&request).await.unwrap_err();
        assert_eq!(err.kind(), TaskErrorKind::ThumbnailUnavailable);

        let request = request.with_image("/nonexistent/a.jpg");
        let err = gateway.analyze(&request).await.unwrap_err();
        assert_eq!(err.kind(), TaskErrorKind::ThumbnailUnavailable);
    }

    #[test]
    fn test_preview_prompt_uses_override() {
        let describe = ProviderConfig::new(ProviderKind::Gemini).with_prompt("Caption for {timestamp}");
        let gateway = AiGateway::new(describe, ProviderConfig::new(ProviderKind::Claude));

        let prompt = gateway.preview_prompt(&AiRequest::new(AiOperation::Describe, "a.jpg"));
        assert_eq!(prompt, "Caption for unknown");
    }

    #[test]
    fn test_for_photo_fills_describe_context() {
        let mut photo = Photo::new("a.jpg");
        photo.original_gps = Some(GpsCoordinates::new(1.0, 2.0));
        photo.location_name = Some("Harbour".to_string());

        let request = AiRequest::for_photo(AiOperation::Describe, &photo);
        assert_eq!(request.gps, Some(GpsCoordinates::new(1.0, 2.0)));
        assert_eq!(request.location_name.as_deref(), Some("Harbour"));

        let request = AiRequest::for_photo(AiOperation::Locate, &photo);
        assert!(request.gps.is_none());
        assert!(request.location_name.is_none());
    }
}
