use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::credentials::AppCredentials;
use crate::gh::{GhError, GhRunner};

pub const APP_ID_SECRET: &str = "APP_ID";
pub const APP_PRIVATE_KEY_SECRET: &str = "APP_PRIVATE_KEY";
pub const RECOVERY_KEY_FILE: &str = "app-private-key.pem";
/// Raw conversion response kept when it cannot be parsed; it holds the only copy of the key.
pub const RAW_RESPONSE_FILE: &str = "app-manifest-conversion.json";

/// Where the app credentials ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretStorage {
    /// Both `APP_ID` and `APP_PRIVATE_KEY` were written to the repository.
    Stored,
    /// Secret storage failed; the key was written to `path` instead.
    SavedLocally { path: PathBuf, error: String },
    /// Neither secret storage nor the local file worked. The caller must show
    /// the key to the operator.
    NotSaved { error: String },
}

#[derive(Clone)]
pub struct SecretWriter {
    gh: Arc<dyn GhRunner>,
    repo: Option<String>,
}

impl SecretWriter {
    pub fn new(gh: Arc<dyn GhRunner>, repo: Option<String>) -> Self {
        Self { gh, repo }
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    pub async fn write(&self, name: &str, value: &str) -> Result<(), GhError> {
        tracing::debug!(secret = name, repo = ?self.repo, "writing repository secret");
        self.gh.set_secret(name, value, self.repo.as_deref()).await
    }

    /// Writes `APP_ID` then `APP_PRIVATE_KEY`. On failure the key is kept in
    /// `recovery_dir` so it is never lost.
    pub async fn store_app_credentials(
        &self,
        credentials: &AppCredentials,
        recovery_dir: &Path,
    ) -> SecretStorage {
        let result = match self.write(APP_ID_SECRET, &credentials.id.to_string()).await {
            Ok(()) => self.write(APP_PRIVATE_KEY_SECRET, &credentials.pem).await,
            Err(err) => Err(err),
        };

        let Err(err) = result else {
            return SecretStorage::Stored;
        };

        tracing::warn!(error = %err, "storing app secrets failed, saving key locally");
        let error = err.to_string();
        match save_recovery_key(recovery_dir, &credentials.pem) {
            Ok(path) => SecretStorage::SavedLocally { path, error },
            Err(file_err) => {
                tracing::warn!(error = %file_err, "saving recovery key failed");
                SecretStorage::NotSaved {
                    error: format!("{error}; {file_err:#}"),
                }
            }
        }
    }
}

/// Writes the key to `<dir>/app-private-key.pem`, owner-readable only on Unix.
pub fn save_recovery_key(dir: &Path, pem: &str) -> Result<PathBuf> {
    write_private_file(dir, RECOVERY_KEY_FILE, pem)
}

/// Writes an unparseable conversion response to `<dir>/app-manifest-conversion.json`.
pub fn save_raw_response(dir: &Path, body: &str) -> Result<PathBuf> {
    write_private_file(dir, RAW_RESPONSE_FILE, body)
}

fn write_private_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_recovery_key_creates_directory_and_file() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let dir = temp.path().join("nested");

        let path = save_recovery_key(&dir, "---KEY---").expect("save key");

        assert_eq!(path, dir.join(RECOVERY_KEY_FILE));
        assert_eq!(fs::read_to_string(&path).unwrap(), "---KEY---");
    }

    #[cfg(unix)]
    #[test]
    fn recovery_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("create temp dir");
        let path = save_recovery_key(temp.path(), "---KEY---").expect("save key");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
