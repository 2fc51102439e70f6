use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::ModelsSection;
use crate::gh::GhRunner;
use crate::report::FlowReporter;

pub const MODELS_MARKETPLACE_URL: &str = "https://github.com/marketplace/models";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelsResult {
    Configured,
    NotAuthenticated,
    NoAccess,
    /// The inference endpoint could not be reached at all.
    Unreachable,
    SecretFailed,
}

/// Sends a one-token chat request; only a 200 counts as access.
pub async fn check_models_access(
    http: &reqwest::Client,
    endpoint: &str,
    token: &str,
    model: &str,
) -> Result<bool> {
    let body = serde_json::json!({
        "model": model,
        "max_tokens": 1,
        "messages": [{"role": "user", "content": "hi"}]
    });
    let response = http
        .post(endpoint)
        .bearer_auth(token)
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint} failed"))?;

    let status = response.status();
    if status == reqwest::StatusCode::OK {
        return Ok(true);
    }
    tracing::warn!(%status, "GitHub Models rejected the gh token");
    Ok(false)
}

/// Stores the current gh token as the GitHub Models secret of a repository.
pub struct ModelsSetup {
    gh: Arc<dyn GhRunner>,
    http: reqwest::Client,
    settings: ModelsSection,
    repo: Option<String>,
    reporter: Arc<dyn FlowReporter>,
}

impl ModelsSetup {
    pub fn new(
        gh: Arc<dyn GhRunner>,
        http: reqwest::Client,
        settings: ModelsSection,
        repo: Option<String>,
        reporter: Arc<dyn FlowReporter>,
    ) -> Self {
        Self {
            gh,
            http,
            settings,
            repo,
            reporter,
        }
    }

    pub async fn run(&self) -> Result<ModelsResult> {
        self.reporter.info("Setting up GitHub Models access...");

        let token = match self.gh.auth_token().await {
            Ok(token) => token,
            Err(err) if err.is_session_error() => {
                self.reporter.failure(&format!("Error: {err}"));
                return Ok(ModelsResult::NotAuthenticated);
            }
            Err(err) => return Err(err.into()),
        };

        self.reporter.info("Testing GitHub Models access...");
        let access = check_models_access(
            &self.http,
            &self.settings.endpoint,
            &token,
            &self.settings.model,
        )
        .await;
        match access {
            Ok(true) => {}
            Ok(false) => {
                self.reporter
                    .failure("Error: Your GitHub account doesn't have GitHub Models access.");
                self.reporter
                    .info(&format!("Enable it at: {MODELS_MARKETPLACE_URL}"));
                return Ok(ModelsResult::NoAccess);
            }
            Err(err) => {
                tracing::warn!(error = ?err, endpoint = %self.settings.endpoint, "GitHub Models access check failed");
                self.reporter
                    .failure(&format!("Error: Could not reach GitHub Models: {err:#}"));
                self.reporter.info(&format!(
                    "Check your network, or enable access at: {MODELS_MARKETPLACE_URL}"
                ));
                return Ok(ModelsResult::Unreachable);
            }
        }
        self.reporter.success("GitHub Models access confirmed!");

        let name = self.settings.secret_name.as_str();
        self.reporter.info("Adding token to repository secrets...");
        if let Err(err) = self
            .gh
            .set_secret(name, &token, self.repo.as_deref())
            .await
        {
            self.reporter
                .failure(&format!("Could not add secret {name}: {err}"));
            let repo_flag = self
                .repo
                .as_deref()
                .map(|r| format!(" --repo {r}"))
                .unwrap_or_default();
            self.reporter.info(&format!(
                "Add it manually with: gh auth token | gh secret set {name}{repo_flag}"
            ));
            return Ok(ModelsResult::SecretFailed);
        }

        self.reporter.success(&format!("Done! {name} secret added."));
        self.reporter
            .info("The workflows will now use GitHub Models for AI processing.");
        Ok(ModelsResult::Configured)
    }
}
