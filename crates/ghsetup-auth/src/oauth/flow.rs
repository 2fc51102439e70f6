use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::time::{sleep_until, Instant};

use super::pages;
use super::server::{CallbackListener, CallbackOutcome, CallbackSession};
use crate::config::{AppSection, FlowMode, SetupConfig};
use crate::credentials::{AuthorizationCode, InvalidCode};
use crate::gh::GhRunner;
use crate::manifest::{AppManifest, GitHubWeb};
use crate::provision::{ProvisionError, ProvisionReport, Provisioner};
use crate::report::FlowReporter;
use crate::secrets::{APP_ID_SECRET, APP_PRIVATE_KEY_SECRET};

pub trait BrowserOpener: Send + Sync {
    fn open(&self, target: &str) -> Result<()>;
}

pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, target: &str) -> Result<()> {
        webbrowser::open(target)
            .map(|_| ())
            .with_context(|| format!("failed to open browser for {target}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOptions {
    pub mode: FlowMode,
    pub manual_paste: bool,
    pub open_browser: bool,
    pub port: u16,
    pub timeout: Duration,
    /// Serve again after a redirect without a usable code.
    pub keep_listening: bool,
}

impl FlowOptions {
    pub fn from_config(config: &SetupConfig) -> Self {
        Self {
            mode: config.callback.mode,
            manual_paste: config.callback.manual_paste_enabled(),
            open_browser: true,
            port: config.callback.port,
            timeout: config.callback.timeout(),
            keep_listening: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    Completed(ProvisionReport),
    NotAuthenticated,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasteError {
    #[error("That does not look like a URL. Paste the full address from the browser bar.")]
    NotAUrl,
    #[error("The pasted URL has no code parameter.")]
    MissingCode,
    #[error("The pasted URL carries an invalid code.")]
    MalformedCode,
    #[error("The pasted URL belongs to a different setup run.")]
    StateMismatch,
}

/// Pulls the authorization code out of a redirect URL pasted by the operator.
pub fn parse_redirect_input(
    input: &str,
    expected_state: Option<&str>,
) -> Result<AuthorizationCode, PasteError> {
    let url = url::Url::parse(input.trim()).map_err(|_| PasteError::NotAUrl)?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    let code = code
        .filter(|c| !c.trim().is_empty())
        .ok_or(PasteError::MissingCode)?;
    if let Some(expected) = expected_state {
        if state.as_deref() != Some(expected) {
            return Err(PasteError::StateMismatch);
        }
    }
    AuthorizationCode::parse(&code).map_err(|err| match err {
        InvalidCode::Missing => PasteError::MissingCode,
        InvalidCode::Malformed => PasteError::MalformedCode,
    })
}

/// Steps printed whenever the run ends without stored credentials.
pub fn manual_recovery_steps(web: &GitHubWeb, app_name: &str, repo: Option<&str>) -> Vec<String> {
    let repo_flag = repo.map(|r| format!(" --repo {r}")).unwrap_or_default();
    vec![
        "If the app was created, finish the setup manually:".to_string(),
        format!("  1. Open {} and select '{app_name}'.", web.apps_page()),
        "  2. Note the App ID and generate a private key (.pem).".to_string(),
        format!("  3. gh secret set {APP_ID_SECRET}{repo_flag}   (enter the App ID when prompted)"),
        format!("  4. gh secret set {APP_PRIVATE_KEY_SECRET}{repo_flag} < path/to/private-key.pem"),
        format!(
            "  5. Install the app from {}/<app-slug>/installations",
            web.apps_page()
        ),
    ]
}

enum WaitEvent {
    Callback(Result<CallbackOutcome>),
    Pasted(AuthorizationCode),
    Deadline,
}

/// Drives one manifest registration from browser hand-off to stored secrets.
pub struct FlowDriver {
    gh: Arc<dyn GhRunner>,
    app: AppSection,
    web: GitHubWeb,
    repo: Option<String>,
    recovery_dir: PathBuf,
    next_steps: Option<String>,
    options: FlowOptions,
    reporter: Arc<dyn FlowReporter>,
    opener: Arc<dyn BrowserOpener>,
}

impl FlowDriver {
    pub fn new(
        config: &SetupConfig,
        options: FlowOptions,
        gh: Arc<dyn GhRunner>,
        reporter: Arc<dyn FlowReporter>,
    ) -> Self {
        Self {
            gh,
            app: config.app.clone(),
            web: GitHubWeb::new(config.github.web_url.as_str(), config.app.org.clone()),
            repo: config.secrets.repo.clone(),
            recovery_dir: config.secrets.recovery_dir.clone(),
            next_steps: config.next_steps.clone(),
            options,
            reporter,
            opener: Arc::new(SystemBrowser),
        }
    }

    pub fn with_opener(mut self, opener: Arc<dyn BrowserOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// `paste_input` is read for pasted redirect URLs when manual paste is on.
    pub async fn run<R>(&self, paste_input: Option<R>) -> Result<FlowResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        if let Err(err) = self.gh.auth_status().await {
            if err.is_session_error() {
                self.reporter.failure(&err.to_string());
                return Ok(FlowResult::NotAuthenticated);
            }
            return Err(err).context("failed to check the gh session");
        }

        let provisioner = Arc::new(Provisioner::new(
            self.gh.clone(),
            self.repo.clone(),
            self.recovery_dir.clone(),
            self.reporter.clone(),
        ));
        let state = uuid::Uuid::new_v4().simple().to_string();

        let mut listener = CallbackListener::bind(self.options.port).await?;
        let port = listener.local_addr().port();
        let manifest = AppManifest::from_config(&self.app).with_redirect_url(listener.redirect_url());
        tracing::info!(app = manifest.name(), port, mode = ?self.options.mode, "starting manifest flow");
        self.reporter
            .info(&format!("Creating GitHub App: {}", manifest.name()));

        // Held until the flow ends; dropping it deletes the form page.
        let _form_page = self.present(&manifest, &state)?;

        // Kept for the whole run so a partly read line survives a cancelled wait.
        let mut paste_input = paste_input
            .filter(|_| self.options.manual_paste)
            .map(AsyncBufReadExt::lines);
        if paste_input.is_some() {
            self.reporter.info(
                "If the browser does not come back here, paste the full URL it was redirected to and press Enter:",
            );
        }
        let deadline = Instant::now() + self.options.timeout;

        loop {
            let mut handle = listener.spawn(CallbackSession {
                provisioner: provisioner.clone(),
                web: self.web.clone(),
                expected_state: Some(state.clone()),
            });

            let event = tokio::select! {
                outcome = handle.outcome() => WaitEvent::Callback(outcome),
                code = next_pasted_code(&mut paste_input, &state, self.reporter.as_ref()) => WaitEvent::Pasted(code),
                _ = sleep_until(deadline) => WaitEvent::Deadline,
            };
            let late_outcome = handle.shutdown().await;

            let outcome = match event {
                WaitEvent::Callback(outcome) => outcome?,
                WaitEvent::Pasted(code) => resolve_pasted(&provisioner, &code, late_outcome).await,
                WaitEvent::Deadline => late_outcome.unwrap_or(CallbackOutcome::TimedOut),
            };

            match outcome {
                CallbackOutcome::Provisioned(report) => {
                    self.report_completion(&report);
                    return Ok(FlowResult::Completed(report));
                }
                rejected @ (CallbackOutcome::MissingCode
                | CallbackOutcome::MalformedCode
                | CallbackOutcome::StateMismatch) => {
                    self.reporter.failure(&rejected_message(&rejected));
                    if self.options.keep_listening && Instant::now() < deadline {
                        self.reporter.info("Waiting for another redirect...");
                        listener = CallbackListener::bind(port).await?;
                        continue;
                    }
                    self.report_manual_recovery();
                    return Ok(FlowResult::Failed);
                }
                CallbackOutcome::ExchangeFailed(_) | CallbackOutcome::CodeReused => {
                    self.report_manual_recovery();
                    return Ok(FlowResult::Failed);
                }
                CallbackOutcome::TimedOut => {
                    self.reporter.failure(&format!(
                        "No redirect received within {} seconds.",
                        self.options.timeout.as_secs()
                    ));
                    self.report_manual_recovery();
                    return Ok(FlowResult::TimedOut);
                }
            }
        }
    }

    fn present(&self, manifest: &AppManifest, state: &str) -> Result<Option<NamedTempFile>> {
        match self.options.mode {
            FlowMode::Browser => {
                let url = self.web.new_app_url(manifest, state)?;
                self.reporter
                    .info("Opening browser - click 'Create GitHub App'");
                self.open_or_print(&url);
                Ok(None)
            }
            FlowMode::Form => {
                let html = pages::manifest_form_page(
                    &self.web.new_app_endpoint(state),
                    &manifest.to_json()?,
                );
                let mut page = tempfile::Builder::new()
                    .prefix("ghsetup-manifest-")
                    .suffix(".html")
                    .tempfile()
                    .context("failed to create the manifest form page")?;
                page.write_all(html.as_bytes())
                    .and_then(|_| page.flush())
                    .context("failed to write the manifest form page")?;

                self.reporter
                    .info("Opening manifest form - click 'Create GitHub App' on GitHub");
                self.open_or_print(&page.path().display().to_string());
                Ok(Some(page))
            }
        }
    }

    fn open_or_print(&self, target: &str) {
        if self.options.open_browser {
            match self.opener.open(target) {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(error = %err, "browser launch failed");
                    self.reporter
                        .failure(&format!("Failed to open browser: {err}"));
                }
            }
        }
        self.reporter.info("Open this in your browser:");
        self.reporter.info(target);
    }

    fn report_completion(&self, report: &ProvisionReport) {
        self.reporter.info(&format!(
            "Install the app: {}",
            self.web.install_url(&report.credentials.slug)
        ));
        match &self.next_steps {
            Some(hint) => self.reporter.success(&format!("Done! {hint}")),
            None => self.reporter.success("Done!"),
        }
    }

    fn report_manual_recovery(&self) {
        for line in manual_recovery_steps(&self.web, self.app.name.trim(), self.repo.as_deref()) {
            self.reporter.info(&line);
        }
    }
}

fn rejected_message(outcome: &CallbackOutcome) -> String {
    match outcome {
        CallbackOutcome::StateMismatch => {
            "Received a redirect from a different setup run; ignoring it.".to_string()
        }
        CallbackOutcome::MalformedCode => "Received a redirect with an invalid code.".to_string(),
        _ => "Received a redirect without a code.".to_string(),
    }
}

async fn provision_pasted(provisioner: &Provisioner, code: &AuthorizationCode) -> CallbackOutcome {
    match provisioner.provision(code).await {
        Ok(report) => CallbackOutcome::Provisioned(report),
        Err(ProvisionError::CodeReused) => CallbackOutcome::CodeReused,
        Err(ProvisionError::Exchange(err)) => CallbackOutcome::ExchangeFailed(err.to_string()),
    }
}

/// A redirect that reached the exchange wins over the pasted code; a rejected
/// one does not.
async fn resolve_pasted(
    provisioner: &Provisioner,
    code: &AuthorizationCode,
    late_outcome: Option<CallbackOutcome>,
) -> CallbackOutcome {
    match late_outcome {
        Some(
            outcome @ (CallbackOutcome::Provisioned(_)
            | CallbackOutcome::ExchangeFailed(_)
            | CallbackOutcome::CodeReused),
        ) => outcome,
        Some(rejected) => {
            tracing::debug!(outcome = ?rejected, "using the pasted code over a rejected redirect");
            provision_pasted(provisioner, code).await
        }
        None => provision_pasted(provisioner, code).await,
    }
}

/// Never resolves once the input is exhausted, leaving the listener and the
/// deadline to end the wait. Cancel-safe.
async fn next_pasted_code<R>(
    input: &mut Option<Lines<R>>,
    state: &str,
    reporter: &dyn FlowReporter,
) -> AuthorizationCode
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(lines) = input.as_mut() else {
            return std::future::pending().await;
        };

        let read = lines.next_line().await;
        match read {
            Ok(None) => *input = None,
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_redirect_input(&line, Some(state)) {
                    Ok(code) => return code,
                    Err(err) => reporter.failure(&err.to_string()),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "reading pasted URL failed");
                reporter.failure("Could not read the pasted URL; still waiting for the browser.");
                *input = None;
            }
        }
    }
}
