//! Starts a report generation task and follows it to the end.
//!
//! ```sh
//! API_BASE_URL=http://localhost:8000 cargo run --example poll_task
//! ```
use anyhow::anyhow;
use rapi::{
    ApiClient, MonitorOptions, RequestOptions, TaskMonitor, TaskSnapshot, serde_json::json,
    telemetry, tracing,
};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("rapi=info,poll_task=info").map_err(|e| anyhow!(e))?;

    let client = ApiClient::from_env()?;
    let monitor = TaskMonitor::from_client(&client);

    let accepted = client
        .post(
            "/reports/generate",
            RequestOptions::new().json(json!({"report": "sales", "format": "pdf"})),
        )
        .await?;
    let task_id = accepted
        .get("task_id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| anyhow!("no task_id in response: {accepted}"))?
        .to_string();

    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = std::sync::Arc::new(std::sync::Mutex::new(Some(done_tx)));
    let on_error_tx = done_tx.clone();

    let options = MonitorOptions::new()
        .on_progress(|snapshot: &TaskSnapshot| {
            tracing::info!(
                state = %snapshot.state,
                progress = ?snapshot.progress_percentage,
                step = ?snapshot.step_name,
                "task progress"
            );
        })
        .on_complete(move |result| {
            if let Some(tx) = done_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(Ok(result));
            }
        })
        .on_error(move |error| {
            if let Some(tx) = on_error_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(Err(error));
            }
        });

    monitor.start_monitoring(&task_id, options);

    tokio::select! {
        outcome = done_rx => match outcome? {
            Ok(result) => tracing::info!("report ready: {}", result),
            Err(error) => tracing::error!("report failed: {}", error),
        },
        _ = tokio::signal::ctrl_c() => {
            monitor.stop_monitoring(&task_id);
            tracing::warn!("stopped monitoring {}", task_id);
        }
    }
    Ok(())
}
