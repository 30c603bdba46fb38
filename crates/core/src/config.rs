use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

use crate::item::WorkKind;
use crate::record::{Encoding, Format};

/// Typed view of the YAML configuration file. Unknown keys are ignored;
/// fields carry the documented defaults when absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub webserver: WebServerConfig,
    pub response: ResponseConfig,
    pub request: RequestConfig,
}

/// `worker.*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pool size W.
    pub number: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { number: 10 }
    }
}

/// `webserver.*` keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
    /// Path to a `user:bcrypt-hash` credentials file; absent disables auth.
    pub auth: Option<PathBuf>,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: "localhost".to_string(),
            port: 3000,
            auth: None,
        }
    }
}

/// `response.*` keys.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub format: Format,
    pub encoding: EncodingConfig,
    pub es: Option<EsConfig>,
}

/// `response.encoding.*` keys.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    #[serde(rename = "type")]
    pub kind: Encoding,
}

/// `response.es.*` keys: the Elasticsearch bulk sink.
#[derive(Debug, Clone, Deserialize)]
pub struct EsConfig {
    pub host: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub password: String,
    pub index_name: String,
}

/// `request.*` keys: the one-shot / periodic batch descriptor and the
/// probe defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Subject echoed into every result record.
    pub subject: String,
    /// Pool default timeout (seconds) for items that do not set one.
    pub timeout: u64,
    /// Comma-separated inputs, as on the console.
    pub input: String,
    #[serde(rename = "type")]
    pub kind: WorkKind,
    pub name: String,
    /// Re-run the configured batch on a cron schedule in server mode.
    pub cronjob: bool,
    /// Cron expression for `cronjob`.
    pub rule: String,
    /// Skip TLS verification in the HTTP probe. Defaults to true, matching
    /// the probe's use against internal endpoints with self-signed certs.
    pub insecure_skip_verify: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            subject: String::new(),
            timeout: 30,
            input: String::new(),
            kind: WorkKind::Command,
            name: String::new(),
            cronjob: false,
            rule: String::new(),
            insecure_skip_verify: true,
        }
    }
}

impl Config {
    /// Loads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.worker.number == 0 {
            anyhow::bail!("worker.number must be >= 1");
        }
        if let Some(es) = &self.response.es {
            if es.host.is_empty() {
                anyhow::bail!("response.es.host is required when response.es is set");
            }
            if es.index_name.is_empty() {
                anyhow::bail!("response.es.index_name is required when response.es is set");
            }
        }
        if self.request.cronjob && self.request.rule.is_empty() {
            anyhow::bail!("request.rule is required when request.cronjob is enabled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::item::WorkKind;
    use crate::record::{Encoding, Format};

    #[test]
    fn full_config_parses() {
        let yaml = r#"
worker:
  number: 4
webserver:
  enable: true
  host: 0.0.0.0
  port: 8080
response:
  format: plain
  encoding:
    type: url
  es:
    host: http://es:9200
    id: writer
    password: secret
    index_name: mcall
request:
  subject: probes
  timeout: 5
  input: "echo a,echo b"
  type: cmd
  name: nightly
  cronjob: true
  rule: "0 3 * * *"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg_is_valid(&cfg);
        assert_eq!(cfg.worker.number, 4);
        assert_eq!(cfg.webserver.port, 8080);
        assert_eq!(cfg.response.format, Format::Plain);
        assert_eq!(cfg.response.encoding.kind, Encoding::Url);
        assert_eq!(cfg.response.es.as_ref().unwrap().index_name, "mcall");
        assert_eq!(cfg.request.kind, WorkKind::Command);
        assert_eq!(cfg.request.timeout, 5);
        assert!(cfg.request.cronjob);
    }

    #[test]
    fn defaults_and_unknown_keys() {
        let cfg: Config = serde_yaml::from_str("unknown_section:\n  x: 1\n").unwrap();
        cfg_is_valid(&cfg);
        assert_eq!(cfg.worker.number, 10);
        assert_eq!(cfg.webserver.host, "localhost");
        assert_eq!(cfg.webserver.port, 3000);
        assert_eq!(cfg.response.format, Format::Json);
        assert_eq!(cfg.response.encoding.kind, Encoding::None);
        assert!(cfg.response.es.is_none());
        assert_eq!(cfg.request.timeout, 30);
        assert!(cfg.request.insecure_skip_verify);
    }

    #[test]
    fn incomplete_es_section_is_rejected() {
        let cfg: Config = serde_yaml::from_str("response:\n  es:\n    host: h\n    index_name: \"\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    fn cfg_is_valid(cfg: &Config) {
        cfg.validate().unwrap();
    }
}
