use crate::executors::ExecutionResult;
use crate::table::Table;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

/// Remote execution dispatch: POST the snippet and a split-orient copy of the
/// table to the operator-supplied webhook. The reply's `image_data` /
/// `stdout` / `error` fields are taken as-is; transport failures and
/// timeouts are synthesized into an error result. No retry.
#[tracing::instrument(skip_all, fields(url = %url))]
pub async fn run_webhook(
    url: &str,
    timeout_secs: u64,
    code: &str,
    table: &Table,
) -> ExecutionResult {
    let payload = json!({
        "code": code,
        "df_json": table.to_split_json().to_string(),
    });
    let resp = reqwest::Client::new()
        .post(url)
        .json(&payload)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await;
    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "webhook dispatch failed");
            return ExecutionResult::from_error(format!(
                "failed to reach execution webhook: {e}"
            ));
        }
    };
    if !resp.status().is_success() {
        return ExecutionResult::from_error(format!(
            "execution webhook returned {}",
            resp.status()
        ));
    }
    let v: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => {
            return ExecutionResult::from_error(format!(
                "execution webhook reply was not JSON: {e}"
            ))
        }
    };
    let field = |name: &str| v.get(name).and_then(|x| x.as_str()).map(|s| s.to_string());
    let error = field("error");
    ExecutionResult {
        // a reply that both errored and rendered is treated as an error
        image_data: if error.is_some() { None } else { field("image_data") },
        stdout: field("stdout"),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table::from_csv_bytes(b"a,b\n1,2\n").unwrap()
    }

    #[tokio::test]
    async fn unreachable_webhook_synthesizes_error_result() {
        // Port 9 (discard) is reliably closed on loopback.
        let out = run_webhook("http://127.0.0.1:9", 2, "print(1)", &sample_table()).await;
        assert!(out.image_data.is_none());
        assert!(out.error.unwrap().contains("execution webhook"));
    }

    #[tokio::test]
    async fn image_reply_is_passed_through() {
        let addr = serve_canned(r#"{"image_data":"aGVsbG8="}"#).await;
        let out = run_webhook(&format!("http://{addr}"), 5, "plt.plot()", &sample_table()).await;
        assert!(out.error.is_none());
        assert_eq!(out.image_data.as_deref(), Some("aGVsbG8="));
    }

    #[tokio::test]
    async fn error_reply_is_passed_through() {
        let addr = serve_canned(r#"{"error":"KeyError: 'Fart'"}"#).await;
        let out = run_webhook(&format!("http://{addr}"), 5, "df['Fart']", &sample_table()).await;
        assert!(out.image_data.is_none());
        assert!(out.error.unwrap().contains("Fart"));
    }

    /// One-shot HTTP responder: consumes the request, replies with `body`.
    async fn serve_canned(body: &'static str) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                match sock.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some(pos) = find(&buf, b"\r\n\r\n") {
                            break pos + 4;
                        }
                    }
                }
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                match sock.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = sock.write_all(resp.as_bytes()).await;
            let _ = sock.shutdown().await;
        });
        addr
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }
}
