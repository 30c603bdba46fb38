use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::Utc;

use mcall_core::{Encoding, EsConfig, Format, ResultRecord};

pub(crate) fn render(records: &[ResultRecord], format: Format, encoding: Encoding) -> String {
    let records = encode_records(records, encoding);
    match format {
        Format::Json => serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string()),
        Format::Plain => records
            .iter()
            .map(|record| record.content.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn encode_records(records: &[ResultRecord], encoding: Encoding) -> Vec<ResultRecord> {
    records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            record.content = match encoding {
                Encoding::None => record.content,
                Encoding::Std => STANDARD.encode(record.content),
                Encoding::Url => URL_SAFE.encode(record.content),
            };
            record
        })
        .collect()
}

// Bulk-indexes the batch into `<index_name>-YYYY.MM.DD`. Failures are the
// caller's to log; result delivery never depends on the sink.
pub(crate) async fn forward_to_es(
    http: &reqwest::Client,
    es: &EsConfig,
    records: &[ResultRecord],
) -> anyhow::Result<()> {
    let index = format!("{}-{}", es.index_name, Utc::now().format("%Y.%m.%d"));
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::json!({"index": {"_index": index}}).to_string());
        body.push('\n');
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }

    let url = format!("{}/_bulk", es.host.trim_end_matches('/'));
    let mut request = http
        .post(&url)
        .header("content-type", "application/x-ndjson")
        .body(body);
    if !es.id.is_empty() {
        request = request.basic_auth(&es.id, Some(&es.password));
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        anyhow::bail!("es bulk returned {}", response.status());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::render;
    use mcall_core::{Encoding, Format, ResultRecord};

    fn record(content: &str) -> ResultRecord {
        ResultRecord {
            input: "echo".to_string(),
            name: None,
            error_code: "0".to_string(),
            content: content.to_string(),
            timestamp: "2026-08-01T00:00:00.000Z".to_string(),
            subject: None,
            hostname: None,
        }
    }

    #[test]
    fn json_format_renders_an_array_with_wire_keys() {
        let rendered = render(&[record("hi\n")], Format::Json, Encoding::None);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value[0]["errorCode"], "0");
        assert_eq!(value[0]["result"], "hi\n");
        assert_eq!(value[0]["ts"], "2026-08-01T00:00:00.000Z");
    }

    #[test]
    fn plain_format_concatenates_contents() {
        let rendered = render(&[record("a"), record("b")], Format::Plain, Encoding::None);
        assert_eq!(rendered, "a\nb");
    }

    #[test]
    fn std_and_url_encodings_differ_on_the_alphabet() {
        // ">>>???" encodes to "Pj4+Pz8/", exercising the +/ vs -_ split.
        let content = ">>>???";
        let std = render(&[record(content)], Format::Plain, Encoding::Std);
        let url = render(&[record(content)], Format::Plain, Encoding::Url);
        assert_ne!(std, url);

        use base64::Engine as _;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(std)
            .unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), content);
    }
}
