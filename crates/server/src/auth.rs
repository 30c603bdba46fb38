use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::routes::AppState;

/// Basic-auth credentials loaded from a file of `user:bcrypt-hash` lines.
#[derive(Debug, Default)]
pub struct Credentials {
    users: HashMap<String, String>,
}

impl Credentials {
    /// Loads the credentials file. Blank lines and `#` comments are
    /// skipped; malformed lines are rejected.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read auth file {}", path.display()))?;

        let mut users = HashMap::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, hash) = line.split_once(':').ok_or_else(|| {
                anyhow::anyhow!("{}:{}: expected user:bcrypt-hash", path.display(), lineno + 1)
            })?;
            users.insert(user.to_string(), hash.to_string());
        }
        Ok(Self { users })
    }

    #[cfg(test)]
    pub(crate) fn with_user(user: &str, password: &str) -> Self {
        let hash = bcrypt::hash(password, 4).expect("bcrypt hash");
        let mut users = HashMap::new();
        users.insert(user.to_string(), hash);
        Self { users }
    }

    fn verify(&self, user: &str, password: &str) -> bool {
        match self.users.get(user) {
            Some(hash) => bcrypt::verify(password, hash).unwrap_or(false),
            None => false,
        }
    }
}

pub(crate) async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(credentials) = state.auth.clone() else {
        return next.run(request).await;
    };

    let pair = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(decode_basic);

    let authorized = match pair {
        Some((user, password)) => verify_blocking(credentials, user, password).await,
        None => false,
    };

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"mcall\"")],
            "unauthorized",
        )
            .into_response()
    }
}

// bcrypt verification is deliberately slow; keep it off the executor.
async fn verify_blocking(credentials: Arc<Credentials>, user: String, password: String) -> bool {
    tokio::task::spawn_blocking(move || credentials.verify(&user, &password))
        .await
        .unwrap_or(false)
}

fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}
