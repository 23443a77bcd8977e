//! Subprocess backends
//!
//! Three fixed backend kinds, each with its own argument shape. The response
//! body is the captured stdout; a hard timeout bounds every invocation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tagiato_common::config::{ProviderKind, ProviderSettings};
use tokio::process::Command;

use super::AiError;

/// Fixed ceiling for one backend invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest stderr excerpt kept on a failed invocation
const STDERR_EXCERPT_LEN: usize = 500;

/// Resolved backend selection for one operation
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Prompt template override
    pub prompt: Option<String>,
    /// Executable override; the backend's default name on `PATH` otherwise
    pub binary: Option<PathBuf>,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: kind.default_model().to_string(),
            prompt: None,
            binary: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            model: settings.model().to_string(),
            prompt: settings.prompt.clone().filter(|p| !p.trim().is_empty()),
            ..Self::new(settings.provider)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn program(&self) -> PathBuf {
        self.binary
            .clone()
            .unwrap_or_else(|| PathBuf::from(binary_name(self.kind)))
    }
}

/// Executable name each backend installs
pub fn binary_name(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Claude => "claude",
        ProviderKind::Gemini => "gemini",
        ProviderKind::OpenAi => "codex",
    }
}

/// Whether the image path is written into the prompt text
///
/// The OpenAI CLI takes the image as a flag instead.
pub fn image_in_prompt(kind: ProviderKind) -> bool {
    !matches!(kind, ProviderKind::OpenAi)
}

/// Argument vector for one invocation
pub fn command_args(kind: ProviderKind, model: &str, prompt: &str, image: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    match kind {
        ProviderKind::Claude => {
            args.extend(["--dangerously-skip-permissions", "--model", model, "--print"].map(OsString::from));
        }
        ProviderKind::Gemini => {
            args.extend(["--yolo", "--model", model, "--output-format", "text"].map(OsString::from));
        }
        ProviderKind::OpenAi => {
            args.extend(["exec", "--model", model].map(OsString::from));
            if let Some(image) = image {
                args.push("--image".into());
                args.push(image.as_os_str().to_owned());
            }
            args.push("--full-auto".into());
        }
    }
    args.push(prompt.into());
    args
}

/// Backend binary resolvable on `PATH`
pub fn is_available(kind: ProviderKind) -> bool {
    which::which(binary_name(kind)).is_ok()
}

/// Installed backends, in declaration order
pub fn available_providers() -> Vec<ProviderKind> {
    ProviderKind::ALL
        .into_iter()
        .filter(|kind| is_available(*kind))
        .collect()
}

/// Run the backend and return its stdout
///
/// The child is killed when the timeout elapses (dropping the wait future
/// drops the child, and `kill_on_drop` is set).
pub async fn run_backend(config: &ProviderConfig, prompt: &str, image: Option<&Path>) -> Result<String, AiError> {
    let program = config.program();
    let args = command_args(config.kind, &config.model, prompt, image);

    tracing::info!(
        provider = %config.kind,
        model = %config.model,
        program = %program.display(),
        "Invoking AI backend"
    );
    tracing::debug!(prompt = %prompt, "AI prompt");

    let child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AiError::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

    let output = match tokio::time::timeout(config.timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| AiError::BackendFailed {
            code: None,
            stderr: e.to_string(),
        })?,
        Err(_) => {
            tracing::warn!(
                provider = %config.kind,
                timeout_secs = config.timeout.as_secs(),
                "AI backend timed out"
            );
            return Err(AiError::Timeout {
                secs: config.timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(STDERR_EXCERPT_LEN).collect();
        tracing::warn!(
            provider = %config.kind,
            code = ?output.status.code(),
            stderr = %stderr,
            "AI backend exited with failure"
        );
        return Err(AiError::BackendFailed {
            code: output.status.code(),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    tracing::trace!(response = %stdout, "AI raw response");
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(args: &[OsString]) -> Vec<&str> {
        args.iter().map(|a| a.to_str().unwrap()).collect()
    }

    #[test]
    fn test_claude_args() {
        let args = command_args(ProviderKind::Claude, "sonnet", "PROMPT", Some(Path::new("/t/a.jpg")));
        assert_eq!(
            strs(&args),
            vec!["--dangerously-skip-permissions", "--model", "sonnet", "--print", "PROMPT"]
        );
    }

    #[test]
    fn test_gemini_args() {
        let args = command_args(ProviderKind::Gemini, "flash", "PROMPT", None);
        assert_eq!(
            strs(&args),
            vec!["--yolo", "--model", "flash", "--output-format", "text", "PROMPT"]
        );
    }

    #[test]
    fn test_openai_args_attach_image_flag() {
        let args = command_args(ProviderKind::OpenAi, "o3", "PROMPT", Some(Path::new("/t/a.jpg")));
        assert_eq!(
            strs(&args),
            vec!["exec", "--model", "o3", "--image", "/t/a.jpg", "--full-auto", "PROMPT"]
        );

        let args = command_args(ProviderKind::OpenAi, "o3", "PROMPT", None);
        assert_eq!(strs(&args), vec!["exec", "--model", "o3", "--full-auto", "PROMPT"]);
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = ProviderSettings::new(ProviderKind::Gemini);
        settings.prompt = Some("  ".to_string());
        let config = ProviderConfig::from_settings(&settings);
        assert_eq!(config.model, "flash");
        assert!(config.prompt.is_none());
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.program(), PathBuf::from("gemini"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let config = ProviderConfig::new(ProviderKind::Claude).with_binary("/nonexistent/tagiato-backend");
        let err = run_backend(&config, "hi", None).await.unwrap_err();
        assert!(matches!(err, AiError::Spawn { .. }));
    }
}
