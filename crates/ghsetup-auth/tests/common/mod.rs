#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ghsetup_auth::config::SetupConfig;
use ghsetup_auth::gh::{GhError, GhRunner, HttpMethod};
use ghsetup_auth::oauth::{BrowserOpener, FlowOptions};
use ghsetup_auth::FlowMode;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretWrite {
    pub name: String,
    pub value: String,
    pub repo: Option<String>,
}

/// In-memory `gh` that records every call.
pub struct RecordingGh {
    logged_in: bool,
    conversion: Result<Value, String>,
    secret_error: Option<String>,
    api_calls: Mutex<Vec<(String, HttpMethod)>>,
    secrets: Mutex<Vec<SecretWrite>>,
}

impl RecordingGh {
    pub fn new(conversion: Value) -> Self {
        Self {
            logged_in: true,
            conversion: Ok(conversion),
            secret_error: None,
            api_calls: Mutex::new(Vec::new()),
            secrets: Mutex::new(Vec::new()),
        }
    }

    pub fn logged_out() -> Self {
        Self {
            logged_in: false,
            ..Self::new(Value::Null)
        }
    }

    pub fn failing_exchange(stderr: &str) -> Self {
        Self {
            conversion: Err(stderr.to_string()),
            ..Self::new(Value::Null)
        }
    }

    pub fn with_secret_error(mut self, stderr: &str) -> Self {
        self.secret_error = Some(stderr.to_string());
        self
    }

    pub fn api_calls(&self) -> Vec<(String, HttpMethod)> {
        self.api_calls.lock().unwrap().clone()
    }

    pub fn secrets(&self) -> Vec<SecretWrite> {
        self.secrets.lock().unwrap().clone()
    }
}

#[async_trait]
impl GhRunner for RecordingGh {
    async fn api(
        &self,
        endpoint: &str,
        method: HttpMethod,
        _payload: Option<&Value>,
    ) -> Result<Option<Value>, GhError> {
        self.api_calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), method));
        match &self.conversion {
            Ok(value) => Ok(Some(value.clone())),
            Err(stderr) => Err(GhError::CommandFailed {
                command: format!("gh api {endpoint} -X {}", method.as_str()),
                stderr: stderr.clone(),
            }),
        }
    }

    async fn set_secret(&self, name: &str, value: &str, repo: Option<&str>) -> Result<(), GhError> {
        if let Some(stderr) = &self.secret_error {
            return Err(GhError::CommandFailed {
                command: format!("gh secret set {name}"),
                stderr: stderr.clone(),
            });
        }
        self.secrets.lock().unwrap().push(SecretWrite {
            name: name.to_string(),
            value: value.to_string(),
            repo: repo.map(str::to_string),
        });
        Ok(())
    }

    async fn auth_status(&self) -> Result<(), GhError> {
        if self.logged_in {
            Ok(())
        } else {
            Err(GhError::NotLoggedIn)
        }
    }

    async fn auth_token(&self) -> Result<String, GhError> {
        if self.logged_in {
            Ok("gho_recorded".to_string())
        } else {
            Err(GhError::NotLoggedIn)
        }
    }
}

/// What the fake browser does once GitHub would have created the app.
#[derive(Debug, Clone)]
pub enum Visit {
    /// Follow the redirect with this code and the flow's own state.
    Code(String),
    /// Follow the redirect with a state from some other run.
    ForeignState(String),
    /// First a redirect with a foreign state, then a good one.
    ForeignThenCode(String),
    /// Type the redirect URL into the paste input instead.
    Paste(String),
    /// Never come back.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

/// Plays the operator's browser against the local callback listener.
pub struct FakeBrowser {
    visit: Visit,
    paste: Mutex<Option<DuplexStream>>,
    opened: Mutex<Vec<String>>,
    replies: Mutex<Option<JoinHandle<Vec<Reply>>>>,
}

impl FakeBrowser {
    pub fn new(visit: Visit) -> Self {
        Self {
            visit,
            paste: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
            replies: Mutex::new(None),
        }
    }

    pub fn with_paste(self, paste: DuplexStream) -> Self {
        *self.paste.lock().unwrap() = Some(paste);
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub async fn replies(&self) -> Vec<Reply> {
        let handle = self.replies.lock().unwrap().take();
        match handle {
            Some(handle) => handle.await.unwrap(),
            None => Vec::new(),
        }
    }
}

impl BrowserOpener for FakeBrowser {
    fn open(&self, target: &str) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(target.to_string());

        let Some((redirect, state)) = redirect_and_state(target) else {
            return Ok(());
        };

        match self.visit.clone() {
            Visit::Nothing => {}
            Visit::Code(code) => {
                let url = format!("{redirect}/?code={code}&state={state}");
                *self.replies.lock().unwrap() =
                    Some(tokio::spawn(async move { vec![get_with_retry(&url).await] }));
            }
            Visit::ForeignState(code) => {
                let url = format!("{redirect}/?code={code}&state=someone-else");
                *self.replies.lock().unwrap() =
                    Some(tokio::spawn(async move { vec![get_with_retry(&url).await] }));
            }
            Visit::ForeignThenCode(code) => {
                let foreign = format!("{redirect}/?code=stale&state=someone-else");
                let good = format!("{redirect}/?code={code}&state={state}");
                *self.replies.lock().unwrap() = Some(tokio::spawn(async move {
                    let first = get_with_retry(&foreign).await;
                    let mut second = get_with_retry(&good).await;
                    // The listener is re-bound between the two redirects.
                    for _ in 0..50 {
                        if second.status != 410 {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        second = get_with_retry(&good).await;
                    }
                    vec![first, second]
                }));
            }
            Visit::Paste(code) => {
                if let Some(mut paste) = self.paste.lock().unwrap().take() {
                    let line = format!("{redirect}/?code={code}&state={state}\n");
                    tokio::spawn(async move {
                        paste.write_all(b"not a url\n").await.unwrap();
                        paste.write_all(line.as_bytes()).await.unwrap();
                        // Keep the writer alive so the reader never sees EOF early.
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    });
                }
            }
        }
        Ok(())
    }
}

/// Pulls the manifest redirect and the run's state out of a creation URL.
fn redirect_and_state(target: &str) -> Option<(String, String)> {
    let url = url::Url::parse(target).ok()?;
    let mut state = None;
    let mut redirect = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "state" => state = Some(value.into_owned()),
            "manifest" => {
                let manifest: Value = serde_json::from_str(&value).ok()?;
                redirect = manifest["redirect_url"].as_str().map(str::to_string);
            }
            _ => {}
        }
    }
    let redirect = redirect?.replace("localhost", "127.0.0.1");
    Some((redirect, state?))
}

async fn get_with_retry(url: &str) -> Reply {
    let client = reqwest::Client::new();
    let mut last_error = None;
    for _ in 0..50 {
        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Reply { status, body };
            }
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
    panic!("callback listener never answered: {last_error:?}");
}

pub fn test_config(recovery_dir: &std::path::Path) -> SetupConfig {
    let mut config = SetupConfig::default();
    config.app.name = "x".to_string();
    config.secrets.repo = Some("acme/widgets".to_string());
    config.secrets.recovery_dir = recovery_dir.to_path_buf();
    config.next_steps = Some("Run 'make test-issue' to try it.".to_string());
    config
}

pub fn test_options(timeout: Duration) -> FlowOptions {
    FlowOptions {
        mode: FlowMode::Browser,
        manual_paste: false,
        open_browser: true,
        port: 0,
        timeout,
        keep_listening: false,
    }
}

pub fn created_app() -> Value {
    serde_json::json!({
        "id": 123,
        "name": "x",
        "slug": "x-bot",
        "pem": "---KEY---"
    })
}

pub fn no_paste() -> Option<&'static [u8]> {
    None
}
