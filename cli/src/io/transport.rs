use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sc64deck_core::runner::CommandRunner;

use crate::handler::dispatch::Dispatcher;
use crate::protocol::errors;
use crate::protocol::messages::{JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest};

/// Maximum message size: 1 MiB.
const MAX_LINE_SIZE: usize = 1_048_576;

/// Sender half for forwarding scheduler events as notifications.
pub type NotificationSender = tokio::sync::mpsc::UnboundedSender<JsonRpcNotification>;

/// Run the NDJSON transport loop over arbitrary async reader/writer.
///
/// Reads JSON-RPC messages from `reader` (one per line) and writes
/// responses to `writer`. Operation notifications are interleaved via
/// `tokio::select!`. The loop exits when the reader reaches EOF,
/// the cancellation token is triggered, or an I/O error occurs.
pub async fn run_transport_loop<Rd, W, R>(
    reader: &mut Rd,
    writer: &mut W,
    dispatcher: &mut Dispatcher<R>,
    notification_rx: &mut tokio::sync::mpsc::UnboundedReceiver<JsonRpcNotification>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    Rd: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
    R: CommandRunner + 'static,
{
    let mut line = String::new();

    loop {
        line.clear();

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Shutdown signal received, exiting transport loop");
                break;
            }

            result = reader.read_line(&mut line) => {
                let bytes_read = result?;
                if bytes_read == 0 {
                    debug!("Reader closed (EOF), exiting transport loop");
                    break;
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                if trimmed.len() > MAX_LINE_SIZE {
                    warn!("Message exceeds 1 MiB limit ({} bytes)", trimmed.len());
                    let err = JsonRpcErrorResponse::new(
                        serde_json::Value::Null,
                        errors::INVALID_REQUEST,
                        "Message exceeds 1 MiB size limit",
                    );
                    write_json(writer, &serde_json::to_value(&err)?).await?;
                    continue;
                }

                debug!("Received: {}", trimmed);

                let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Failed to parse JSON-RPC request: {e}");
                        let code = if e.is_data() {
                            errors::INVALID_REQUEST
                        } else {
                            errors::PARSE_ERROR
                        };
                        let err = JsonRpcErrorResponse::new(
                            serde_json::Value::Null,
                            code,
                            format!("Parse error: {e}"),
                        );
                        write_json(writer, &serde_json::to_value(&err)?).await?;
                        continue;
                    }
                };

                if request.jsonrpc != "2.0" {
                    let err = JsonRpcErrorResponse::new(
                        request.id,
                        errors::INVALID_REQUEST,
                        "Invalid JSON-RPC version (must be \"2.0\")",
                    );
                    write_json(writer, &serde_json::to_value(&err)?).await?;
                    continue;
                }

                let result = dispatcher.dispatch(request).await;
                let response_json = result.to_json()?;
                debug!("Sending: {}", response_json);
                write_json(writer, &response_json).await?;
            }

            Some(notification) = notification_rx.recv() => {
                let json = serde_json::to_value(&notification)?;
                debug!("Sending notification: {}", json);
                write_json(writer, &json).await?;
            }
        }
    }

    Ok(())
}

/// Write a JSON value as an NDJSON line to the writer.
pub async fn write_json<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc64deck_core::client::DeployerClient;
    use sc64deck_core::config::DeployerConfig;
    use sc64deck_core::scheduler::OperationScheduler;
    use serde_json::Value;
    use tokio::io::BufReader;

    async fn run_lines(input: &str) -> Vec<Value> {
        let client =
            DeployerClient::new(DeployerConfig::with_executable("/nonexistent/sc64deployer"));
        let mut dispatcher = Dispatcher::new(OperationScheduler::new(client));
        let (_tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut reader = BufReader::new(input.as_bytes());
        let mut out: Vec<u8> = Vec::new();
        run_transport_loop(
            &mut reader,
            &mut out,
            &mut dispatcher,
            &mut rx,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn write_json_appends_newline() {
        let mut buf: Vec<u8> = Vec::new();
        let value = serde_json::json!({"jsonrpc": "2.0", "result": {}, "id": 1});
        write_json(&mut buf, &value).await.unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.ends_with('\n'));
        assert_eq!(output.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(parsed["id"], 1);
    }

    #[tokio::test]
    async fn answers_each_line_and_stops_at_eof() {
        let responses = run_lines(
            "{\"jsonrpc\":\"2.0\",\"method\":\"op.state\",\"params\":{\"id\":\"x\"},\"id\":1}\n\
             \n\
             not json\n\
             {\"method\":\"op.state\"}\n\
             {\"jsonrpc\":\"1.0\",\"method\":\"op.state\",\"id\":4}\n",
        )
        .await;
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0]["id"], 1);
        assert!(responses[0]["result"]["state"].is_null());
        assert_eq!(responses[1]["error"]["code"], errors::PARSE_ERROR);
        assert_eq!(responses[2]["error"]["code"], errors::INVALID_REQUEST);
        assert_eq!(responses[3]["error"]["code"], errors::INVALID_REQUEST);
        assert_eq!(responses[3]["id"], 4);
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected() {
        let big = format!("{}\n", "x".repeat(MAX_LINE_SIZE + 1));
        let responses = run_lines(&big).await;
        assert_eq!(responses.len(), 1);
        assert!(responses[0]["error"]["message"]
            .as_str()
            .unwrap()
            .contains("1 MiB"));
    }

    #[tokio::test]
    async fn notifications_are_written_between_responses() {
        let client =
            DeployerClient::new(DeployerConfig::with_executable("/nonexistent/sc64deployer"));
        let mut dispatcher = Dispatcher::new(OperationScheduler::new(client));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(JsonRpcNotification::new("op.started", serde_json::json!({"id": "a"})))
            .unwrap();

        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, mut server_write) = tokio::io::split(server_end);
        let mut reader = BufReader::new(server_read);
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let server = tokio::spawn(async move {
            run_transport_loop(&mut reader, &mut server_write, &mut dispatcher, &mut rx, stop)
                .await
                .unwrap();
        });

        let mut lines = BufReader::new(client_end).lines();
        let first: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["method"], "op.started");
        assert!(first.get("id").is_none());

        shutdown.cancel();
        server.await.unwrap();
    }
}
