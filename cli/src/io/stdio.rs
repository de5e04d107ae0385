use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sc64deck_core::client::DeployerClient;
use sc64deck_core::config::DeployerConfig;
use sc64deck_core::models::OperationEvent;
use sc64deck_core::scheduler::OperationScheduler;

use super::transport::{run_transport_loop, NotificationSender};
use crate::handler::dispatch::Dispatcher;
use crate::protocol::methods::event_notification;

/// Serve the operation API as JSON-RPC over stdin/stdout.
///
/// Logs go to stderr. Closing stdin or Ctrl-C cancels all outstanding
/// operations.
pub async fn run_stdio_loop(config: DeployerConfig) -> anyhow::Result<()> {
    let scheduler = OperationScheduler::new(DeployerClient::new(config));
    let (notification_tx, mut notification_rx) = tokio::sync::mpsc::unbounded_channel();
    let forwarder = tokio::spawn(forward_events(scheduler.subscribe(), notification_tx));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            on_signal.cancel();
        }
    });

    let mut dispatcher = Dispatcher::new(scheduler.clone());
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    info!("Stdio transport loop started, waiting for input");
    let result = run_transport_loop(
        &mut reader,
        &mut stdout,
        &mut dispatcher,
        &mut notification_rx,
        shutdown,
    )
    .await;

    scheduler.shutdown();
    forwarder.abort();
    info!("Stdio transport loop stopped");
    result
}

async fn forward_events(
    mut events: tokio::sync::mpsc::UnboundedReceiver<OperationEvent>,
    notifications: NotificationSender,
) {
    while let Some(event) = events.recv().await {
        if notifications.send(event_notification(&event)).is_err() {
            break;
        }
    }
}
