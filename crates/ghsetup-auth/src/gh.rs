use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_GH_BINARY: &str = "gh";

#[derive(Debug, thiserror::Error)]
pub enum GhError {
    #[error("`{binary}` was not found. Install the GitHub CLI from https://cli.github.com first")]
    NotInstalled { binary: String },
    #[error("Not logged in to gh CLI. Run 'gh auth login' first.")]
    NotLoggedIn,
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("`{command}` returned no output")]
    EmptyResponse { command: String },
    #[error("`{command}` returned an unexpected payload: {source}")]
    InvalidResponse {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "`{command}` returned credentials in an unexpected shape: {source}; the raw response was saved to {}",
        .saved_to.display()
    )]
    UnexpectedCredentials {
        command: String,
        saved_to: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl GhError {
    /// Session problems end the run; everything else is a per-call failure.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::NotInstalled { .. } | Self::NotLoggedIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Everything this tool asks of GitHub goes through an authenticated `gh`.
#[async_trait]
pub trait GhRunner: Send + Sync {
    /// `gh api <endpoint> -X <method>`, with the JSON payload (if any) on stdin.
    async fn api(
        &self,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<&Value>,
    ) -> Result<Option<Value>, GhError>;

    /// `gh secret set <name>`. The value is only ever written to stdin.
    async fn set_secret(&self, name: &str, value: &str, repo: Option<&str>) -> Result<(), GhError>;

    async fn auth_status(&self) -> Result<(), GhError>;

    async fn auth_token(&self) -> Result<String, GhError>;
}

#[derive(Debug, Clone)]
pub struct GhCommand {
    binary: String,
}

impl Default for GhCommand {
    fn default() -> Self {
        Self::new(DEFAULT_GH_BINARY)
    }
}

impl GhCommand {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, GhError> {
        let command = self.describe(args);
        tracing::debug!(%command, with_stdin = stdin.is_some(), "running gh");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    GhError::NotInstalled {
                        binary: self.binary.clone(),
                    }
                } else {
                    GhError::Io {
                        command: command.clone(),
                        source,
                    }
                }
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            match pipe.write_all(input).await {
                Ok(()) => {}
                // gh exited without reading; its exit status and stderr say why.
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(%command, "gh closed stdin early");
                }
                Err(source) => {
                    return Err(GhError::Io {
                        command: command.clone(),
                        source,
                    })
                }
            }
            // Closing stdin lets gh see EOF.
            drop(pipe);
        }

        child
            .wait_with_output()
            .await
            .map_err(|source| GhError::Io { command, source })
    }

    fn check(&self, args: &[&str], output: Output) -> Result<Output, GhError> {
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::warn!(command = %self.describe(args), status = ?output.status.code(), "gh call failed");
        Err(GhError::CommandFailed {
            command: self.describe(args),
            stderr,
        })
    }
}

#[async_trait]
impl GhRunner for GhCommand {
    async fn api(
        &self,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<&Value>,
    ) -> Result<Option<Value>, GhError> {
        let mut args = vec!["api", endpoint, "-X", method.as_str()];
        let body = payload.map(|value| value.to_string());
        if body.is_some() {
            args.extend(["--input", "-"]);
        }

        let output = self.run(&args, body.as_deref().map(str::as_bytes)).await?;
        let output = self.check(&args, output)?;

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&output.stdout)
            .map(Some)
            .map_err(|source| GhError::InvalidResponse {
                command: self.describe(&args),
                source,
            })
    }

    async fn set_secret(&self, name: &str, value: &str, repo: Option<&str>) -> Result<(), GhError> {
        let mut args = vec!["secret", "set", name];
        if let Some(repo) = repo {
            args.extend(["--repo", repo]);
        }
        let output = self.run(&args, Some(value.as_bytes())).await?;
        self.check(&args, output).map(|_| ())
    }

    async fn auth_status(&self) -> Result<(), GhError> {
        let args = ["auth", "status"];
        let output = self.run(&args, None).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(GhError::NotLoggedIn)
        }
    }

    async fn auth_token(&self) -> Result<String, GhError> {
        let args = ["auth", "token"];
        let output = self.run(&args, None).await?;
        if !output.status.success() {
            return Err(GhError::NotLoggedIn);
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(GhError::NotLoggedIn);
        }
        Ok(token)
    }
}
