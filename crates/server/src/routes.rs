use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::extract::{Form, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use mcall_core::{Batch, Context, Format, WorkKind, parse_params};
use mcall_engine::{EngineConfig, execute_batch};

use crate::auth::{Credentials, require_basic_auth};

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<Context>,
    pub engine: EngineConfig,
    /// Basic-auth credentials; `None` leaves the surface open.
    pub auth: Option<Arc<Credentials>>,
}

/// Builds the router: `/healthcheck` (always open) plus the `/mcall`
/// submission routes (auth-gated when credentials are configured).
pub fn router(state: AppState) -> Router {
    let submission = Router::new()
        .route("/mcall/:type/:params", get(run_get))
        .route("/mcall", post(run_post))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .merge(submission)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until the shutdown signal flips.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .with_context(|| format!("bind {host}:{port}"))?;
    tracing::info!(host, port, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn healthcheck() -> &'static str {
    "OK"
}

async fn run_get(
    State(state): State<AppState>,
    Path((kind, params)): Path<(String, String)>,
) -> Response {
    run(state, &params, parse_kind(&kind), None).await
}

#[derive(Debug, Deserialize)]
struct PostBody {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    params: String,
}

async fn run_post(State(state): State<AppState>, Form(body): Form<PostBody>) -> Response {
    let kind = body.kind.as_deref().and_then(parse_kind);
    run(state, &body.params, kind, body.name).await
}

async fn run(
    state: AppState,
    params: &str,
    default_kind: Option<WorkKind>,
    default_name: Option<String>,
) -> Response {
    let mut items = match parse_params(params, default_kind) {
        Ok(items) => items,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    if let Some(name) = default_name {
        for item in items.iter_mut().filter(|item| item.name.is_none()) {
            item.name = Some(name.clone());
        }
    }

    match execute_batch(state.ctx.clone(), &state.engine, Batch::new(items)).await {
        Ok(output) => {
            let content_type = match state.ctx.format {
                Format::Json => "application/json",
                Format::Plain => "text/plain; charset=utf-8",
            };
            ([(header::CONTENT_TYPE, content_type)], output.rendered).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "batch execution failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "batch execution failed").into_response()
        }
    }
}

fn parse_kind(raw: &str) -> Option<WorkKind> {
    match raw {
        "cmd" => Some(WorkKind::Command),
        "get" => Some(WorkKind::HttpGet),
        "post" => Some(WorkKind::HttpPost),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use base64::Engine as _;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE};
    use tower::ServiceExt as _;

    use super::{AppState, router};
    use crate::auth::Credentials;
    use mcall_core::{Config, Context};
    use mcall_engine::EngineConfig;

    fn state(auth: Option<Credentials>) -> AppState {
        AppState {
            ctx: Arc::new(Context::from_config(&Config::default())),
            engine: EngineConfig::default(),
            auth: auth.map(Arc::new),
        }
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthcheck_responds_ok() {
        let response = router(state(None))
            .oneshot(Request::get("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn get_route_accepts_base64url_params() {
        let params =
            URL_SAFE.encode(r#"{"inputs":[{"input":"echo hello","expect":"hello"}]}"#);
        let response = router(state(None))
            .oneshot(
                Request::get(format!("/mcall/cmd/{params}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value[0]["errorCode"], "0");
        assert_eq!(value[0]["result"], "hello\n");
    }

    #[tokio::test]
    async fn malformed_params_are_a_400() {
        let response = router(state(None))
            .oneshot(
                Request::get("/mcall/cmd/!!!not-base64!!!")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_route_applies_the_shared_name() {
        // URL-safe base64 survives both form and path encoding untouched.
        let params = URL_SAFE.encode(r#"{"inputs":[{"input":"echo one"}]}"#);
        let body = format!("type=cmd&name=batchname&params={params}");
        let response = router(state(None))
            .oneshot(
                Request::post("/mcall")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value[0]["name"], "batchname");
    }

    #[tokio::test]
    async fn submission_routes_require_auth_when_configured() {
        let app = router(state(Some(Credentials::with_user("alice", "s3cret"))));
        let params = URL_SAFE.encode(r#"{"inputs":[{"input":"echo hi"}]}"#);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/mcall/cmd/{params}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let token = STANDARD.encode("alice:s3cret");
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/mcall/cmd/{params}"))
                    .header(header::AUTHORIZATION, format!("Basic {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The healthcheck stays open.
        let response = app
            .oneshot(Request::get("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
