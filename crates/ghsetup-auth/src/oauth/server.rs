use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::pages;
use crate::credentials::{AuthorizationCode, InvalidCode};
use crate::manifest::GitHubWeb;
use crate::provision::{ProvisionError, ProvisionReport, Provisioner};

const CALLBACK_HOST: [u8; 4] = [127, 0, 0, 1];

/// The one result a listening session publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Provisioned(ProvisionReport),
    ExchangeFailed(String),
    CodeReused,
    MissingCode,
    MalformedCode,
    StateMismatch,
    TimedOut,
}

#[derive(Debug, Default)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

impl CallbackQuery {
    /// Never fails; the first value wins when a key repeats.
    fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "code" if query.code.is_none() => query.code = Some(value.into_owned()),
                "state" if query.state.is_none() => query.state = Some(value.into_owned()),
                _ => {}
            }
        }
        query
    }
}

/// What a session needs to turn a redirect into stored credentials.
#[derive(Clone)]
pub struct CallbackSession {
    pub provisioner: Arc<Provisioner>,
    pub web: GitHubWeb,
    /// Redirects must echo this `state`; `None` skips the check.
    pub expected_state: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    session: CallbackSession,
    outcome_tx: Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// A bound, not yet serving, callback socket. Binding happens before the
/// browser is opened so the redirect can never beat the listener.
pub struct CallbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl CallbackListener {
    /// Binds `127.0.0.1:<port>`; port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((CALLBACK_HOST, port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind callback server at {addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read callback server address")?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// GitHub redirects to `localhost`, which resolves to the bound loopback address.
    pub fn redirect_url(&self) -> String {
        format!("http://localhost:{}", self.local_addr.port())
    }

    pub fn spawn(self, session: CallbackSession) -> ListenerHandle {
        let (outcome_tx, outcome_rx) = oneshot::channel::<CallbackOutcome>();
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let app = callback_router(CallbackState {
            session,
            outcome_tx: Arc::new(Mutex::new(Some(outcome_tx))),
            shutdown_tx: shutdown_tx.clone(),
        });

        let listener = self.listener;
        tracing::debug!(addr = %self.local_addr, "callback server listening");
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let mut rx = shutdown_rx;
                    let _ = rx.recv().await;
                })
                .await
        });

        ListenerHandle {
            outcome_rx: Some(outcome_rx),
            shutdown_tx,
            server_task,
        }
    }
}

pub struct ListenerHandle {
    outcome_rx: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown_tx: broadcast::Sender<()>,
    server_task: JoinHandle<std::io::Result<()>>,
}

impl ListenerHandle {
    /// Resolves once the single callback has been handled. Cancel-safe.
    pub async fn outcome(&mut self) -> Result<CallbackOutcome> {
        let Some(rx) = self.outcome_rx.as_mut() else {
            return Err(anyhow!("callback outcome was already taken"));
        };
        let result = rx.await;
        self.outcome_rx = None;
        result.map_err(|_| anyhow!("callback server stopped before receiving a redirect"))
    }

    /// Stops serving, waiting for an in-flight callback to finish. Returns an
    /// outcome that arrived but was never taken.
    pub async fn shutdown(self) -> Option<CallbackOutcome> {
        let _ = self.shutdown_tx.send(());
        match self.server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "callback server stopped with an error"),
            Err(err) => tracing::warn!(error = %err, "callback server task failed"),
        }
        self.outcome_rx.and_then(|mut rx| rx.try_recv().ok())
    }
}

fn callback_router(state: CallbackState) -> Router {
    Router::new()
        .route("/", get(handle_callback))
        .with_state(state)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let Some(outcome_tx) = state.outcome_tx.lock().await.take() else {
        return (StatusCode::GONE, Html(pages::completed_page())).into_response();
    };
    let query = CallbackQuery::parse(raw_query.as_deref());

    // Detached so a dropped browser connection cannot lose exchanged credentials.
    let worker = tokio::spawn(async move {
        let (status, page, outcome) = resolve_callback(&state.session, query).await;
        let _ = outcome_tx.send(outcome);
        let _ = state.shutdown_tx.send(());
        (status, page)
    });

    match worker.await {
        Ok((status, page)) => (status, Html(page)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "callback worker failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(pages::failure_page("internal error while handling the redirect")),
            )
                .into_response()
        }
    }
}

async fn resolve_callback(
    session: &CallbackSession,
    query: CallbackQuery,
) -> (StatusCode, String, CallbackOutcome) {
    let raw_code = query.code.unwrap_or_default();
    if raw_code.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            pages::missing_code_page(),
            CallbackOutcome::MissingCode,
        );
    }

    if let Some(expected) = &session.expected_state {
        if query.state.as_deref() != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                pages::state_mismatch_page(),
                CallbackOutcome::StateMismatch,
            );
        }
    }

    let code = match AuthorizationCode::parse(&raw_code) {
        Ok(code) => code,
        Err(InvalidCode::Missing) => {
            return (
                StatusCode::BAD_REQUEST,
                pages::missing_code_page(),
                CallbackOutcome::MissingCode,
            )
        }
        Err(InvalidCode::Malformed) => {
            return (
                StatusCode::BAD_REQUEST,
                pages::malformed_code_page(),
                CallbackOutcome::MalformedCode,
            )
        }
    };

    match session.provisioner.provision(&code).await {
        Ok(report) => {
            let install_url = session.web.install_url(&report.credentials.slug);
            let page = pages::success_page(&report, &install_url);
            (StatusCode::OK, page, CallbackOutcome::Provisioned(report))
        }
        Err(ProvisionError::CodeReused) => (
            StatusCode::CONFLICT,
            pages::failure_page("This code was already used."),
            CallbackOutcome::CodeReused,
        ),
        Err(ProvisionError::Exchange(err)) => {
            let message = err.to_string();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                pages::failure_page(&message),
                CallbackOutcome::ExchangeFailed(message),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tokio::sync::{broadcast, oneshot, Mutex};
    use tower::ServiceExt;

    use super::{callback_router, CallbackOutcome, CallbackQuery, CallbackSession, CallbackState};
    use crate::gh::{GhError, GhRunner, HttpMethod};
    use crate::manifest::GitHubWeb;
    use crate::provision::Provisioner;
    use crate::report::MemoryReporter;

    /// Any call means an exchange or secret write was attempted.
    struct UnreachableGh;

    #[async_trait]
    impl GhRunner for UnreachableGh {
        async fn api(&self, _: &str, _: HttpMethod, _: Option<&Value>) -> Result<Option<Value>, GhError> {
            panic!("gh api must not be called")
        }

        async fn set_secret(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), GhError> {
            panic!("gh secret set must not be called")
        }

        async fn auth_status(&self) -> Result<(), GhError> {
            Ok(())
        }

        async fn auth_token(&self) -> Result<String, GhError> {
            Ok("token".to_string())
        }
    }

    /// Returns a created app for every conversion and accepts every secret.
    struct CannedGh {
        conversions: AtomicUsize,
    }

    #[async_trait]
    impl GhRunner for CannedGh {
        async fn api(&self, _: &str, _: HttpMethod, _: Option<&Value>) -> Result<Option<Value>, GhError> {
            self.conversions.fetch_add(1, Ordering::SeqCst);
            Ok(Some(serde_json::json!({
                "id": 123, "name": "x", "slug": "x-bot", "pem": "---KEY---"
            })))
        }

        async fn set_secret(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), GhError> {
            Ok(())
        }

        async fn auth_status(&self) -> Result<(), GhError> {
            Ok(())
        }

        async fn auth_token(&self) -> Result<String, GhError> {
            Ok("token".to_string())
        }
    }

    fn provisioner(gh: Arc<dyn GhRunner>) -> Arc<Provisioner> {
        Arc::new(Provisioner::new(
            gh,
            None,
            std::env::temp_dir(),
            Arc::new(MemoryReporter::new()),
        ))
    }

    fn state_with(
        provisioner: Arc<Provisioner>,
        expected_state: Option<&str>,
    ) -> (CallbackState, oneshot::Receiver<CallbackOutcome>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        (
            CallbackState {
                session: CallbackSession {
                    provisioner,
                    web: GitHubWeb::new("https://github.com", None),
                    expected_state: expected_state.map(str::to_string),
                },
                outcome_tx: Arc::new(Mutex::new(Some(outcome_tx))),
                shutdown_tx,
            },
            outcome_rx,
        )
    }

    fn state(expected_state: Option<&str>) -> (CallbackState, oneshot::Receiver<CallbackOutcome>) {
        state_with(provisioner(Arc::new(UnreachableGh)), expected_state)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_code_is_a_client_error_without_exchange() {
        let (state, outcome_rx) = state(None);
        let app = callback_router(state);

        let response = app.oneshot(get("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(outcome_rx.await.unwrap(), CallbackOutcome::MissingCode);
    }

    #[tokio::test]
    async fn empty_code_counts_as_missing() {
        let (state, outcome_rx) = state(None);
        let response = callback_router(state).oneshot(get("/?code=")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(outcome_rx.await.unwrap(), CallbackOutcome::MissingCode);
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected_before_exchange() {
        let (state, outcome_rx) = state(Some("expected"));
        let response = callback_router(state)
            .oneshot(get("/?code=abc&state=other"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(outcome_rx.await.unwrap(), CallbackOutcome::StateMismatch);
    }

    #[tokio::test]
    async fn malformed_code_is_rejected_before_exchange() {
        let (state, outcome_rx) = state(None);
        let response = callback_router(state)
            .oneshot(get("/?code=..%2Fetc"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(outcome_rx.await.unwrap(), CallbackOutcome::MalformedCode);
    }

    #[tokio::test]
    async fn second_request_after_completion_is_gone() {
        let (state, _outcome_rx) = state(None);
        let app = callback_router(state);

        let first = app.clone().oneshot(get("/")).await.unwrap();
        let second = app.oneshot(get("/?code=abc")).await.unwrap();

        assert_eq!(first.status(), StatusCode::BAD_REQUEST);
        assert_eq!(second.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn other_paths_do_not_end_the_session() {
        let (state, mut outcome_rx) = state(None);
        let app = callback_router(state);

        let response = app.oneshot(get("/favicon.ico")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(outcome_rx.try_recv().is_err());
    }

    #[test]
    fn query_parsing_keeps_the_first_value() {
        let query = CallbackQuery::parse(Some("code=abc&code=def&state=s1&state=s2"));
        assert_eq!(query.code.as_deref(), Some("abc"));
        assert_eq!(query.state.as_deref(), Some("s1"));

        let empty = CallbackQuery::parse(None);
        assert!(empty.code.is_none());
        assert!(empty.state.is_none());
    }

    #[tokio::test]
    async fn repeated_code_field_still_ends_the_session() {
        let (state, outcome_rx) = state(None);
        let app = callback_router(state);

        let first = app
            .clone()
            .oneshot(get("/?code=..%2Fx&code=abc"))
            .await
            .unwrap();
        let second = app.oneshot(get("/?code=abc")).await.unwrap();

        assert_eq!(first.status(), StatusCode::BAD_REQUEST);
        assert_eq!(outcome_rx.await.unwrap(), CallbackOutcome::MalformedCode);
        assert_eq!(second.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn repeated_empty_code_counts_as_missing() {
        let (state, outcome_rx) = state(None);
        let response = callback_router(state)
            .oneshot(get("/?code=&code=abc"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(outcome_rx.await.unwrap(), CallbackOutcome::MissingCode);
    }

    #[tokio::test]
    async fn code_reused_across_sessions_is_a_conflict() {
        let gh = Arc::new(CannedGh {
            conversions: AtomicUsize::new(0),
        });
        let shared = provisioner(gh.clone());

        let (first_state, first_rx) = state_with(shared.clone(), Some("s1"));
        let first = callback_router(first_state)
            .oneshot(get("/?code=abc&state=s1"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(matches!(
            first_rx.await.unwrap(),
            CallbackOutcome::Provisioned(_)
        ));

        let (second_state, second_rx) = state_with(shared, Some("s1"));
        let second = callback_router(second_state)
            .oneshot(get("/?code=abc&state=s1"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(second_rx.await.unwrap(), CallbackOutcome::CodeReused);
        assert_eq!(gh.conversions.load(Ordering::SeqCst), 1);
    }
}
