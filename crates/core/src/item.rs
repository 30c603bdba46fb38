use serde::{Deserialize, Deserializer, Serialize};

/// What a [`WorkItem`] executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkKind {
    /// A shell command line.
    #[default]
    #[serde(rename = "cmd")]
    Command,
    /// An HTTP GET against an absolute URL.
    #[serde(rename = "get")]
    HttpGet,
    /// An HTTP POST (empty body) against an absolute URL.
    #[serde(rename = "post")]
    HttpPost,
}

impl WorkKind {
    /// The wire name (`cmd` | `get` | `post`).
    pub fn as_str(self) -> &'static str {
        match self {
            WorkKind::Command => "cmd",
            WorkKind::HttpGet => "get",
            WorkKind::HttpPost => "post",
        }
    }

    /// Whether this kind is one of the HTTP probes.
    pub fn is_http(self) -> bool {
        matches!(self, WorkKind::HttpGet | WorkKind::HttpPost)
    }
}

/// One unit of work: a shell command or an HTTP request, plus the metadata
/// driving validation and failure handling.
///
/// The wire form (batch descriptors, claim `task-data`) uses the keys
/// `input`, `type`, `name`, `expect`, `exec`, `receivers`, `timeout`;
/// `timeout` is accepted both as an integer and as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Command line, absolute URL, or empty for a no-op item.
    #[serde(default)]
    pub input: String,
    /// Probe selector; defaults to [`WorkKind::Command`].
    #[serde(rename = "type", default)]
    pub kind: WorkKind,
    /// Caller-chosen label echoed in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expectation expression evaluated against the probe output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
    /// Shell command dispatched when validation fails.
    #[serde(rename = "exec", default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Receivers notified when validation fails.
    #[serde(rename = "receivers", default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    /// Per-item timeout in seconds. `0` means the pool default, a negative
    /// value means no per-item timeout and puts the whole batch under the
    /// exit-on-failure policy.
    #[serde(default, deserialize_with = "de_timeout", skip_serializing_if = "timeout_is_default")]
    pub timeout: i64,
}

impl WorkItem {
    /// A command item with everything else defaulted.
    pub fn command(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            kind: WorkKind::Command,
            name: None,
            expect: None,
            remediation: None,
            notify: Vec::new(),
            timeout: 0,
        }
    }

    /// Same item with a different kind.
    pub fn with_kind(mut self, kind: WorkKind) -> Self {
        self.kind = kind;
        self
    }
}

/// An ordered batch of work items plus the response policy derived from
/// them at admission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Items in submission order.
    pub items: Vec<WorkItem>,
    /// Exit the process with a nonzero status when any item fails. Set when
    /// any item carries a negative timeout (the daemon-mode self-destruct,
    /// isolated here as a batch policy rather than a per-item side effect).
    pub exit_on_failure: bool,
}

impl Batch {
    /// Builds a batch, deriving the exit-on-failure policy from the items.
    pub fn new(items: Vec<WorkItem>) -> Self {
        let exit_on_failure = items.iter().any(|item| item.timeout < 0);
        Self {
            items,
            exit_on_failure,
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn timeout_is_default(timeout: &i64) -> bool {
    *timeout == 0
}

pub(crate) fn de_timeout<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimeoutVisitor;

    impl serde::de::Visitor<'_> for TimeoutVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("an integer or a decimal string")
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom("timeout out of range"))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<i64, E> {
            let v = v.trim();
            if v.is_empty() {
                return Ok(0);
            }
            v.parse()
                .map_err(|_| E::custom(format!("invalid timeout {v:?}")))
        }
    }

    deserializer.deserialize_any(TimeoutVisitor)
}
