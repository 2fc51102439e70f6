use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::AppSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct HookAttributes {
    active: bool,
}

/// The app descriptor handed to GitHub's manifest flow.
///
/// Webhooks are never activated, and the redirect URL is the only field that
/// changes after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppManifest {
    name: String,
    url: String,
    hook_attributes: HookAttributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_url: Option<String>,
    public: bool,
    default_permissions: BTreeMap<String, PermissionLevel>,
    default_events: Vec<String>,
}

impl AppManifest {
    pub fn new(name: impl Into<String>, homepage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: homepage.into(),
            hook_attributes: HookAttributes { active: false },
            redirect_url: None,
            public: false,
            default_permissions: BTreeMap::new(),
            default_events: Vec::new(),
        }
    }

    pub fn from_config(app: &AppSection) -> Self {
        let mut manifest = Self::new(app.name.trim(), app.homepage.as_str());
        manifest.public = app.public;
        manifest.default_permissions = app.permissions.clone();
        manifest.default_events = app.events.clone();
        manifest
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = Some(redirect_url.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    pub fn webhooks_active(&self) -> bool {
        self.hook_attributes.active
    }

    pub fn permissions(&self) -> &BTreeMap<String, PermissionLevel> {
        &self.default_permissions
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize app manifest")
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize app manifest")
    }
}

/// Locations on the GitHub web UI for the current user or an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubWeb {
    base: String,
    org: Option<String>,
}

impl GitHubWeb {
    pub fn new(base: impl Into<String>, org: Option<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            org: org.filter(|o| !o.trim().is_empty()),
        }
    }

    /// Where the operator finds registered apps.
    pub fn apps_page(&self) -> String {
        match &self.org {
            Some(org) => format!("{}/organizations/{}/settings/apps", self.base, org),
            None => format!("{}/settings/apps", self.base),
        }
    }

    /// Form action / GET target for a new app, carrying the run's `state`.
    pub fn new_app_endpoint(&self, state: &str) -> String {
        format!("{}/new?state={}", self.apps_page(), urlencoding::encode(state))
    }

    pub fn new_app_url(&self, manifest: &AppManifest, state: &str) -> Result<String> {
        let json = manifest.to_json()?;
        Ok(format!(
            "{}&manifest={}",
            self.new_app_endpoint(state),
            urlencoding::encode(&json)
        ))
    }

    pub fn install_url(&self, slug: &str) -> String {
        format!("{}/{}/installations", self.apps_page(), slug)
    }
}
