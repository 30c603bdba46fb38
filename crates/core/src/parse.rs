use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::item::{WorkItem, WorkKind};

/// A submission error: the request never became a batch.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The params argument was empty.
    #[error("empty request params")]
    Empty,
    /// The params argument was neither JSON nor base64-encoded JSON.
    #[error("params are neither JSON nor base64-encoded JSON")]
    Undecodable,
    /// The decoded payload was not a valid batch descriptor.
    #[error("invalid batch JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// Wire shape of one entry of `{"inputs": [...]}`. Unlike `WorkItem`, the
// kind is optional here so a surface-level default (the `{type}` path
// segment) can apply to entries that omit it.
#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    input: String,
    #[serde(rename = "type", default)]
    kind: Option<WorkKind>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    expect: Option<String>,
    #[serde(rename = "exec", default)]
    remediation: Option<String>,
    #[serde(rename = "receivers", default)]
    notify: Vec<String>,
    #[serde(default, deserialize_with = "crate::item::de_timeout")]
    timeout: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    inputs: Vec<WireItem>,
}

impl WireItem {
    fn into_item(self, default_kind: Option<WorkKind>) -> WorkItem {
        WorkItem {
            input: self.input,
            kind: self.kind.or(default_kind).unwrap_or_default(),
            name: self.name,
            expect: self.expect,
            remediation: self.remediation,
            notify: self.notify,
            timeout: self.timeout,
        }
    }
}

/// Parses a batch descriptor: a JSON object `{"inputs":[...]}`, either
/// plain or base64-encoded with the standard or URL-safe alphabet.
///
/// `default_kind` applies to entries that omit `type` (the `{type}` path
/// segment of the HTTP surface); entries lacking both fall back to
/// [`WorkKind::Command`].
pub fn parse_params(
    raw: &str,
    default_kind: Option<WorkKind>,
) -> Result<Vec<WorkItem>, ParseError> {
    let decoded = decode_params(raw)?;
    let envelope: Envelope = serde_json::from_str(&decoded)?;
    Ok(envelope
        .inputs
        .into_iter()
        .map(|wire| wire.into_item(default_kind))
        .collect())
}

fn decode_params(raw: &str) -> Result<String, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }
    if raw.starts_with('{') {
        return Ok(raw.to_string());
    }

    for engine in [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(raw) {
            if let Ok(text) = String::from_utf8(bytes) {
                return Ok(text);
            }
        }
    }
    Err(ParseError::Undecodable)
}

/// Builds work items from a console `input` argument: comma-separated
/// inputs sharing one optional name. Non-URL inputs are commands; inputs
/// that parse as absolute http(s) URLs take the configured request kind
/// (falling back to GET when the configured kind is `cmd`).
pub fn console_items(input: &str, kind: WorkKind, name: Option<&str>) -> Vec<WorkItem> {
    input
        .split(',')
        .map(str::trim)
        .map(|segment| {
            let item_kind = if looks_like_url(segment) {
                if kind.is_http() { kind } else { WorkKind::HttpGet }
            } else {
                WorkKind::Command
            };
            WorkItem {
                input: segment.to_string(),
                kind: item_kind,
                name: name.map(str::to_string),
                expect: None,
                remediation: None,
                notify: Vec::new(),
                timeout: 0,
            }
        })
        .collect()
}

/// Whether `input` is an absolute http or https URL.
pub fn looks_like_url(input: &str) -> bool {
    match reqwest::Url::parse(input) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE};

    use super::{ParseError, console_items, looks_like_url, parse_params};
    use crate::item::WorkKind;

    const BATCH: &str = r#"{"inputs":[
        {"input":"echo hello","expect":"hello"},
        {"input":"http://127.0.0.1:9/ok","type":"get","timeout":"3"}
    ]}"#;

    #[test]
    fn plain_and_base64_params_parse_identically() {
        let plain = parse_params(BATCH, None).unwrap();
        let std = parse_params(&STANDARD.encode(BATCH), None).unwrap();
        let url = parse_params(&URL_SAFE.encode(BATCH), None).unwrap();

        assert_eq!(plain, std);
        assert_eq!(plain, url);
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[0].kind, WorkKind::Command);
        assert_eq!(plain[1].kind, WorkKind::HttpGet);
        assert_eq!(plain[1].timeout, 3);
    }

    #[test]
    fn path_type_applies_only_to_entries_without_one() {
        let raw = r#"{"inputs":[{"input":"http://h/one"},{"input":"echo x","type":"cmd"}]}"#;
        let items = parse_params(raw, Some(WorkKind::HttpPost)).unwrap();
        assert_eq!(items[0].kind, WorkKind::HttpPost);
        assert_eq!(items[1].kind, WorkKind::Command);
    }

    #[test]
    fn garbage_params_are_a_submission_error() {
        assert!(matches!(parse_params("", None), Err(ParseError::Empty)));
        assert!(matches!(
            parse_params("%%%not-base64%%%", None),
            Err(ParseError::Undecodable)
        ));
        assert!(matches!(
            parse_params(r#"{"inputs": 7}"#, None),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn console_inputs_split_on_commas_and_classify_urls() {
        let items = console_items("echo a, https://example.com/x", WorkKind::Command, Some("n"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, WorkKind::Command);
        assert_eq!(items[0].input, "echo a");
        assert_eq!(items[1].kind, WorkKind::HttpGet);
        assert_eq!(items[0].name.as_deref(), Some("n"));

        let items = console_items("http://example.com/x", WorkKind::HttpPost, None);
        assert_eq!(items[0].kind, WorkKind::HttpPost);
    }

    #[test]
    fn url_detection_requires_an_absolute_http_url() {
        assert!(looks_like_url("http://example.com/path"));
        assert!(looks_like_url("https://10.0.0.1:8443/"));
        assert!(!looks_like_url("example.com/path"));
        assert!(!looks_like_url("echo http://example.com"));
        assert!(!looks_like_url("ftp://example.com"));
    }
}
