use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::gh::{GhError, GhRunner, HttpMethod};
use crate::secrets::save_raw_response;

/// Single-use code from the manifest redirect.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthorizationCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCode {
    #[error("authorization code is missing")]
    Missing,
    #[error("authorization code contains unexpected characters")]
    Malformed,
}

impl AuthorizationCode {
    /// The code is interpolated into an API path, so only URL-safe token
    /// characters are accepted.
    pub fn parse(raw: &str) -> Result<Self, InvalidCode> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(InvalidCode::Missing);
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvalidCode::Malformed);
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn conversion_endpoint(&self) -> String {
        format!("/app-manifests/{}/conversions", self.0)
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthorizationCode(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppOwner {
    pub login: String,
}

/// Conversion response of `POST /app-manifests/{code}/conversions`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCredentials {
    pub id: u64,
    pub name: String,
    pub slug: String,
    /// PEM-encoded private key.
    pub pem: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub owner: Option<AppOwner>,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("slug", &self.slug)
            .field("pem", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("html_url", &self.html_url)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Converts a manifest code into app credentials. One attempt, no retry.
///
/// A response that does not parse is written to `recovery_dir` first, since it
/// carries the only copy of the private key.
pub async fn exchange_code(
    gh: &dyn GhRunner,
    code: &AuthorizationCode,
    recovery_dir: &Path,
) -> Result<AppCredentials, GhError> {
    let endpoint = code.conversion_endpoint();
    let command = format!("gh api {endpoint} -X POST");
    let value = gh
        .api(&endpoint, HttpMethod::Post, None)
        .await?
        .ok_or_else(|| GhError::EmptyResponse {
            command: command.clone(),
        })?;

    let credentials = match AppCredentials::deserialize(&value) {
        Ok(credentials) => credentials,
        Err(source) => {
            return Err(match save_raw_response(recovery_dir, &value.to_string()) {
                Ok(saved_to) => {
                    tracing::warn!(path = %saved_to.display(), "conversion response did not parse, saved it");
                    GhError::UnexpectedCredentials {
                        command,
                        saved_to,
                        source,
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "saving the conversion response failed");
                    GhError::InvalidResponse { command, source }
                }
            })
        }
    };
    tracing::info!(app_id = credentials.id, slug = %credentials.slug, "manifest code exchanged");
    Ok(credentials)
}
