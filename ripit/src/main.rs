//! Bridges newline-delimited JSON on stdin/stdout to the task engine.
//!
//! Requests: `{"op":"run","task":{"type":..,"payload":..}}` and `{"op":"abort","taskId":..}`.
//! Every task event is written to stdout as one JSON line. Logs go to stderr and the log dir.

use std::time::Duration;

use ripit::config::AppConfig;
use ripit::domain::TaskEnvelope;
use ripit::logging::{init_logging, spawn_retention};
use ripit::services::ServiceContainer;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time given to in-flight events after shutdown before the output is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request {
    Run {
        task: TaskEnvelope,
    },
    Abort {
        #[serde(rename = "taskId")]
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _log_guard = init_logging(&config.log_dir)?;

    let shutdown = CancellationToken::new();
    spawn_retention(config.log_dir.clone(), shutdown.clone());

    let (services, mut events) = ServiceContainer::new(config).await?;
    info!("ripit started");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let event_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if event_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            _ = &mut signal => break,
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let reply = handle_line(&services, &line);
                    if out_tx.send(reply.to_string()).is_err() {
                        break;
                    }
                }
                None => {
                    info!("Input closed");
                    break;
                }
            },
        }
    }

    shutdown.cancel();
    services.shutdown().await?;

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    forwarder.abort();
    drop(out_tx);
    writer.await??;

    info!("ripit stopped");
    Ok(())
}

fn handle_line(services: &ServiceContainer, line: &str) -> Value {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed request");
            return json!({ "error": format!("Malformed request: {e}") });
        }
    };
    debug!(?request, "Request received");

    match request {
        Request::Run { task } => match services.dispatcher.submit(task) {
            Ok(ids) => json!({ "op": "run", "taskIds": ids }),
            Err(e) => json!({ "op": "run", "error": e.to_string() }),
        },
        Request::Abort { task_id } => {
            let success = services.dispatcher.abort(&task_id);
            json!({ "op": "abort", "taskId": task_id, "success": success })
        }
    }
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
