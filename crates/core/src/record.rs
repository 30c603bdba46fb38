use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// `error_code` value for an item that probed and validated successfully.
pub const ERROR_CODE_OK: &str = "0";
/// `error_code` value for any probe or validation failure.
pub const ERROR_CODE_FAILED: &str = "-1";

/// Response rendering format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON array of result records.
    #[default]
    Json,
    /// Raw contents concatenated with newlines.
    Plain,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "plain" => Ok(Format::Plain),
            other => Err(format!("unknown format {other:?} (expected json|plain)")),
        }
    }
}

/// Base64 encoding applied to result content before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// No encoding (the empty string on the wire).
    #[default]
    None,
    /// Standard base64 alphabet.
    Std,
    /// URL-safe base64 alphabet.
    Url,
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Encoding::None),
            "std" => Ok(Encoding::Std),
            "url" => Ok(Encoding::Url),
            other => Err(format!("unknown encoding {other:?} (expected \"\"|std|url)")),
        }
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of one [`crate::WorkItem`], in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// The item's input, echoed.
    pub input: String,
    /// The item's label, echoed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `"0"` on success, `"-1"` on any failure.
    #[serde(rename = "errorCode")]
    pub error_code: String,
    /// Captured stdout+stderr, HTTP body, or failure diagnostic.
    #[serde(rename = "result")]
    pub content: String,
    /// ISO-8601 UTC completion time, millisecond precision.
    #[serde(rename = "ts")]
    pub timestamp: String,
    /// Process-wide subject, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Identity of the executing host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl ResultRecord {
    /// Whether the item probed and validated successfully.
    pub fn passed(&self) -> bool {
        self.error_code == ERROR_CODE_OK
    }
}

/// Current time in the result-record timestamp format.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::{Encoding, Format, timestamp_now};

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ts = timestamp_now();
        let parsed = chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
        assert_eq!(parsed.timezone().local_minus_utc(), 0);
        // 2026-08-01T12:34:56.789Z
        assert_eq!(ts.len(), 24, "unexpected timestamp shape: {ts}");
    }

    #[test]
    fn encoding_parses_the_three_wire_forms() {
        assert_eq!("".parse::<Encoding>().unwrap(), Encoding::None);
        assert_eq!("std".parse::<Encoding>().unwrap(), Encoding::Std);
        assert_eq!("url".parse::<Encoding>().unwrap(), Encoding::Url);
        assert!("b64".parse::<Encoding>().is_err());
    }

    #[test]
    fn format_parses_json_and_plain() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("plain".parse::<Format>().unwrap(), Format::Plain);
        assert!("yaml".parse::<Format>().is_err());
    }
}
