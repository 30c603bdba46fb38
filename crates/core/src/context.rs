use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, EsConfig};
use crate::notify::{LogNotifier, Notifier};
use crate::record::{Encoding, Format};

/// Read-only runtime context threaded through the request surface and the
/// orchestrator. Built once at startup from the merged configuration.
#[derive(Clone)]
pub struct Context {
    /// Subject echoed into result records; empty means omitted.
    pub subject: Option<String>,
    /// Replica identity: the `HOSTNAME` environment variable when set.
    pub hostname: String,
    pub format: Format,
    pub encoding: Encoding,
    pub es: Option<EsConfig>,
    /// Pool default timeout for items that do not set one.
    pub default_timeout: Duration,
    /// Skip TLS verification in the HTTP probe.
    pub insecure_skip_verify: bool,
    pub notifier: Arc<dyn Notifier>,
}

impl Context {
    /// Builds the context from a validated configuration, with the default
    /// log-backed notifier.
    pub fn from_config(cfg: &Config) -> Self {
        let subject = if cfg.request.subject.is_empty() {
            None
        } else {
            Some(cfg.request.subject.clone())
        };
        Self {
            subject,
            hostname: hostname(),
            format: cfg.response.format,
            encoding: cfg.response.encoding.kind,
            es: cfg.response.es.clone(),
            default_timeout: Duration::from_secs(cfg.request.timeout.max(1)),
            insecure_skip_verify: cfg.request.insecure_skip_verify,
            notifier: Arc::new(LogNotifier),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("subject", &self.subject)
            .field("hostname", &self.hostname)
            .field("format", &self.format)
            .field("encoding", &self.encoding)
            .field("default_timeout", &self.default_timeout)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish_non_exhaustive()
    }
}

/// The replica identity: `HOSTNAME` (the pod name under Kubernetes),
/// falling back to `localhost`.
pub fn hostname() -> String {
    match std::env::var("HOSTNAME") {
        Ok(name) if !name.is_empty() => name,
        _ => "localhost".to_string(),
    }
}
