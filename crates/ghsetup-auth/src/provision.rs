use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::credentials::{exchange_code, AppCredentials, AuthorizationCode};
use crate::gh::{GhError, GhRunner};
use crate::report::FlowReporter;
use crate::secrets::{SecretStorage, SecretWriter, APP_ID_SECRET, APP_PRIVATE_KEY_SECRET};

/// Codes claimed during this run. A code is handed out at most once.
#[derive(Debug, Default)]
pub struct CodeLedger {
    claimed: Mutex<HashSet<String>>,
}

impl CodeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the code was already claimed.
    pub fn claim(&self, code: &AuthorizationCode) -> bool {
        match self.claimed.lock() {
            Ok(mut claimed) => claimed.insert(code.as_str().to_string()),
            Err(poisoned) => poisoned.into_inner().insert(code.as_str().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub credentials: AppCredentials,
    pub storage: SecretStorage,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("authorization code was already used in this run")]
    CodeReused,
    #[error(transparent)]
    Exchange(#[from] GhError),
}

pub fn created_message(credentials: &AppCredentials) -> String {
    format!("App created: {} (ID: {})", credentials.name, credentials.id)
}

/// Exchange then store, shared by the callback listener and the paste path.
pub struct Provisioner {
    gh: Arc<dyn GhRunner>,
    writer: SecretWriter,
    recovery_dir: PathBuf,
    ledger: CodeLedger,
    reporter: Arc<dyn FlowReporter>,
}

impl Provisioner {
    pub fn new(
        gh: Arc<dyn GhRunner>,
        repo: Option<String>,
        recovery_dir: impl Into<PathBuf>,
        reporter: Arc<dyn FlowReporter>,
    ) -> Self {
        Self {
            writer: SecretWriter::new(gh.clone(), repo),
            gh,
            recovery_dir: recovery_dir.into(),
            ledger: CodeLedger::new(),
            reporter,
        }
    }

    pub fn reporter(&self) -> &Arc<dyn FlowReporter> {
        &self.reporter
    }

    pub fn repo(&self) -> Option<&str> {
        self.writer.repo()
    }

    pub async fn provision(
        &self,
        code: &AuthorizationCode,
    ) -> Result<ProvisionReport, ProvisionError> {
        if !self.ledger.claim(code) {
            tracing::warn!("refusing to exchange an authorization code twice");
            self.reporter
                .failure("This authorization code was already used; codes are single-use.");
            return Err(ProvisionError::CodeReused);
        }

        self.reporter.info("Exchanging code for credentials...");
        let credentials = match exchange_code(self.gh.as_ref(), code, &self.recovery_dir).await {
            Ok(credentials) => credentials,
            Err(err) => {
                self.reporter.failure(&format!("Error: {err}"));
                return Err(err.into());
            }
        };
        self.reporter.success(&created_message(&credentials));

        self.reporter.info("Adding secrets to repository...");
        let storage = self
            .writer
            .store_app_credentials(&credentials, &self.recovery_dir)
            .await;
        self.report_storage(&credentials, &storage);

        Ok(ProvisionReport {
            credentials,
            storage,
        })
    }

    fn report_storage(&self, credentials: &AppCredentials, storage: &SecretStorage) {
        match storage {
            SecretStorage::Stored => self.reporter.success("Secrets added!"),
            SecretStorage::SavedLocally { path, error } => {
                self.reporter.failure(&format!("Could not add secrets: {error}"));
                self.reporter.info("Manually add these secrets:");
                self.reporter
                    .info(&format!("  {APP_ID_SECRET}: {}", credentials.id));
                self.reporter.info(&format!(
                    "  {APP_PRIVATE_KEY_SECRET}: (saved to {})",
                    path.display()
                ));
            }
            SecretStorage::NotSaved { error } => {
                self.reporter.failure(&format!("Could not add secrets: {error}"));
                self.reporter
                    .info("Manually add these secrets (the key is shown only once):");
                self.reporter
                    .info(&format!("  {APP_ID_SECRET}: {}", credentials.id));
                self.reporter.info(&format!("  {APP_PRIVATE_KEY_SECRET}:"));
                self.reporter.info(&credentials.pem);
            }
        }
    }
}
