use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use mcall_core::WorkKind;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProbeError {
    #[error("probe timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("wait for child: {0}")]
    Wait(std::io::Error),
    #[error("exit status {code}")]
    Exit { code: i32, output: String },
    #[error("http request failed: {0}")]
    Http(String),
}

impl ProbeError {
    // What lands in the result record's content when the probe itself fails.
    pub(crate) fn into_content(self) -> String {
        match self {
            ProbeError::Exit { output, .. } if !output.is_empty() => output,
            other => other.to_string(),
        }
    }
}

/// Splits a command line into program and arguments.
///
/// `bash -c <payload>` keeps the payload as a single argument with one
/// character peeled from each end. That peel assumes surrounding quotes but
/// does not check which quote character it removes (not quote-aware); the
/// behavior is kept as-is because callers depend on it.
///
/// Everything else splits on whitespace, with two argument rewrites:
/// `Content-Type_application/json` becomes `Content-Type: application/json`
/// and backticks become spaces (both let callers smuggle a space through
/// the whitespace split).
pub(crate) fn tokenize(input: &str) -> (String, Vec<String>) {
    if let Some(rest) = input.strip_prefix("bash -c ") {
        return (
            "bash".to_string(),
            vec!["-c".to_string(), strip_one_char_each_end(rest).to_string()],
        );
    }

    let mut tokens = input.split_whitespace();
    let program = tokens.next().unwrap_or_default().to_string();
    let args = tokens
        .map(|tok| {
            tok.replace("Content-Type_application/json", "Content-Type: application/json")
                .replace('`', " ")
        })
        .collect();
    (program, args)
}

fn strip_one_char_each_end(s: &str) -> &str {
    let mut chars = s.chars();
    chars.next();
    chars.next_back();
    chars.as_str()
}

/// Runs one shell probe: spawn, capture stdout+stderr combined, enforce the
/// wall-clock timeout. On timeout the child is killed. `None` means no
/// timeout at all.
pub(crate) async fn run_shell(input: &str, timeout: Option<Duration>) -> Result<String, ProbeError> {
    let (program, args) = tokenize(input);
    let mut child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let wait_all = async {
        let (status, out, err) = tokio::join!(child.wait(), read_all(stdout), read_all(stderr));
        (status, out, err)
    };

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, wait_all).await.ok(),
        None => Some(wait_all.await),
    };
    let Some((status, out, err)) = waited else {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(ProbeError::Timeout {
            secs: timeout.map(|limit| limit.as_secs()).unwrap_or_default(),
        });
    };

    let mut content = String::from_utf8_lossy(&out).into_owned();
    content.push_str(&String::from_utf8_lossy(&err));

    match status {
        Ok(status) if status.success() => Ok(content),
        Ok(status) => Err(ProbeError::Exit {
            code: status.code().unwrap_or(-1),
            output: content,
        }),
        Err(source) => Err(ProbeError::Wait(source)),
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

#[derive(Debug)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) body: String,
}

/// Runs one HTTP probe: GET, or POST with an empty body. The response body
/// is the captured content; the status code is what expectations see.
pub(crate) async fn run_http(
    client: &reqwest::Client,
    url: &str,
    kind: WorkKind,
    timeout: Option<Duration>,
) -> Result<HttpResponse, ProbeError> {
    let request = match kind {
        WorkKind::HttpPost => client.post(url).body(""),
        _ => client.get(url),
    };
    let request = match timeout {
        Some(limit) => request.timeout(limit),
        None => request,
    };

    let map_err = |err: reqwest::Error| {
        if err.is_timeout() {
            ProbeError::Timeout {
                secs: timeout.map(|d| d.as_secs()).unwrap_or(0),
            }
        } else {
            ProbeError::Http(err.to_string())
        }
    };

    let response = request.send().await.map_err(map_err)?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(map_err)?;
    Ok(HttpResponse { status, body })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::{ProbeError, run_http, run_shell, tokenize};
    use mcall_core::WorkKind;

    #[test]
    fn tokenize_splits_on_whitespace() {
        let (program, args) = tokenize("curl -s http://example.com");
        assert_eq!(program, "curl");
        assert_eq!(args, vec!["-s", "http://example.com"]);
    }

    #[test]
    fn tokenize_peels_one_character_around_bash_c_payloads() {
        let (program, args) = tokenize("bash -c 'echo hi; echo bye'");
        assert_eq!(program, "bash");
        assert_eq!(args, vec!["-c", "echo hi; echo bye"]);

        // The peel is not quote-aware: it removes whatever characters sit at
        // the ends, quotes or not.
        let (_, args) = tokenize("bash -c xechox");
        assert_eq!(args[1], "echo");
    }

    #[test]
    fn tokenize_rewrites_header_and_backtick_tokens() {
        let (_, args) = tokenize("curl -H 'Content-Type_application/json' http://h");
        assert_eq!(args[1], "'Content-Type: application/json'");

        let (_, args) = tokenize("echo a`b`c");
        assert_eq!(args[0], "a b c");
    }

    #[tokio::test]
    async fn shell_probe_captures_stdout_and_stderr() {
        let content = run_shell("bash -c 'echo out; echo err >&2'", None).await.unwrap();
        assert!(content.contains("out\n"));
        assert!(content.contains("err\n"));
    }

    #[tokio::test]
    async fn shell_probe_reports_nonzero_exit_with_output() {
        let err = run_shell("bash -c 'echo partial; exit 3'", None)
            .await
            .unwrap_err();
        match err {
            ProbeError::Exit { code, output } => {
                assert_eq!(code, 3);
                assert_eq!(output, "partial\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn shell_probe_kills_on_timeout() {
        let started = Instant::now();
        let err = run_shell("sleep 10", Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn shell_probe_reports_spawn_failures() {
        let err = run_shell("definitely-not-a-command-xyzzy", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn http_probe_returns_status_and_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbody",
                )
                .await;
        });

        let client = reqwest::Client::new();
        let response = run_http(
            &client,
            &format!("http://{addr}/ok"),
            WorkKind::HttpGet,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "body");
    }

    #[tokio::test]
    async fn http_probe_reports_connect_failures() {
        let client = reqwest::Client::new();
        let err = run_http(
            &client,
            "http://127.0.0.1:1/nothing-listens-here",
            WorkKind::HttpGet,
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProbeError::Http(_) | ProbeError::Timeout { .. }));
    }
}
