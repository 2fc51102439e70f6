use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::gh::DEFAULT_GH_BINARY;
use crate::manifest::PermissionLevel;

pub const DEFAULT_CONFIG_FILE: &str = "ghsetup.yaml";
pub const DEFAULT_CALLBACK_PORT: u16 = 3456;
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;
/// GitHub rejects app names longer than this.
pub const MAX_APP_NAME_LEN: usize = 34;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    /// Open the creation page directly with the manifest in the query string.
    #[default]
    Browser,
    /// Open a local page whose form posts the manifest and submits itself.
    Form,
}

fn default_app_name() -> String {
    "ghsetup-bot".to_string()
}

fn default_homepage() -> String {
    "https://github.com".to_string()
}

fn default_permissions() -> BTreeMap<String, PermissionLevel> {
    BTreeMap::from([
        ("contents".to_string(), PermissionLevel::Write),
        ("issues".to_string(), PermissionLevel::Write),
        ("pull_requests".to_string(), PermissionLevel::Write),
        ("models".to_string(), PermissionLevel::Read),
    ])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_homepage")]
    pub homepage: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default = "default_permissions")]
    pub permissions: BTreeMap<String, PermissionLevel>,
    #[serde(default)]
    pub events: Vec<String>,
    /// Register under this organization instead of the current user.
    #[serde(default)]
    pub org: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            homepage: default_homepage(),
            public: false,
            permissions: default_permissions(),
            events: Vec::new(),
            org: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_CALLBACK_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_CALLBACK_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub mode: FlowMode,
    /// `None` enables pasting only in form mode.
    #[serde(default)]
    pub manual_paste: Option<bool>,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            mode: FlowMode::default(),
            manual_paste: None,
        }
    }
}

impl CallbackSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn manual_paste_enabled(&self) -> bool {
        self.manual_paste
            .unwrap_or(matches!(self.mode, FlowMode::Form))
    }
}

fn default_recovery_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsSection {
    /// `OWNER/REPO`; when unset gh infers the repository from the working directory.
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: PathBuf,
}

impl Default for SecretsSection {
    fn default() -> Self {
        Self {
            repo: None,
            recovery_dir: default_recovery_dir(),
        }
    }
}

fn default_gh_binary() -> String {
    DEFAULT_GH_BINARY.to_string()
}

fn default_web_url() -> String {
    "https://github.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSection {
    #[serde(default = "default_gh_binary")]
    pub gh_binary: String,
    #[serde(default = "default_web_url")]
    pub web_url: String,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            gh_binary: default_gh_binary(),
            web_url: default_web_url(),
        }
    }
}

fn default_models_endpoint() -> String {
    "https://models.inference.ai.azure.com/chat/completions".to_string()
}

fn default_models_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_models_secret_name() -> String {
    "GH_MODELS_TOKEN".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsSection {
    #[serde(default = "default_models_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_models_model")]
    pub model: String,
    #[serde(default = "default_models_secret_name")]
    pub secret_name: String,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            endpoint: default_models_endpoint(),
            model: default_models_model(),
            secret_name: default_models_secret_name(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("~/.ghsetup")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub callback: CallbackSection,
    #[serde(default)]
    pub secrets: SecretsSection,
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub models: ModelsSection,
    /// Printed after a successful run, e.g. a command that exercises the new app.
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            callback: CallbackSection::default(),
            secrets: SecretsSection::default(),
            github: GithubSection::default(),
            models: ModelsSection::default(),
            next_steps: None,
            state_dir: default_state_dir(),
        }
    }
}

/// Replaces every `${VAR}` with the variable's value (empty when unset).
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

fn resolve_opt(value: &mut Option<String>) {
    if let Some(raw) = value.as_mut() {
        *raw = resolve_env_var(raw);
    }
    if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
        *value = None;
    }
}

impl SetupConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).context("failed to parse YAML")?
        };
        config.resolve_env();
        config.validate()?;
        Ok(config)
    }

    fn resolve_env(&mut self) {
        self.app.name = resolve_env_var(&self.app.name);
        self.app.homepage = resolve_env_var(&self.app.homepage);
        resolve_opt(&mut self.app.org);
        resolve_opt(&mut self.secrets.repo);
        resolve_opt(&mut self.next_steps);
        self.github.web_url = resolve_env_var(&self.github.web_url);
        self.models.endpoint = resolve_env_var(&self.models.endpoint);
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.app.name.trim();
        if name.is_empty() {
            return Err(anyhow!("app.name must not be empty"));
        }
        if name.chars().count() > MAX_APP_NAME_LEN {
            return Err(anyhow!(
                "app.name must be at most {MAX_APP_NAME_LEN} characters: {name}"
            ));
        }
        if self.callback.port == 0 {
            return Err(anyhow!("callback.port must be non-zero"));
        }
        if self.callback.timeout_secs == 0 {
            return Err(anyhow!("callback.timeout_secs must be greater than zero"));
        }
        url::Url::parse(&self.app.homepage)
            .with_context(|| format!("app.homepage is not a valid URL: {}", self.app.homepage))?;
        url::Url::parse(&self.github.web_url)
            .with_context(|| format!("github.web_url is not a valid URL: {}", self.github.web_url))?;
        if let Some(repo) = &self.secrets.repo {
            let valid = repo
                .split_once('/')
                .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
            if !valid {
                return Err(anyhow!("secrets.repo must look like OWNER/REPO: {repo}"));
            }
        }
        Ok(())
    }
}
