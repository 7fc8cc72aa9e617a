//! Control Plane Watcher: polls the relational control table and
//! maintains the process-wide [`EnabledSet`].
//!
//! Structured as a single long-running worker polling on an interval and
//! reacting to a [`CancellationToken`]: a loop selecting between a timer
//! tick and the shared cancellation token, the same shape [`bootstrap`]
//! uses for its other background tasks.

use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use tokio_util::sync::CancellationToken;

use crate::error::{TransflowError, TransflowResult};
use crate::state::{CallId, EnabledSet};

/// Maximum backoff between retries after a control-plane query failure.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Starting backoff after the first failure.
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Queries the set of currently-enabled CallIds.
///
/// The core issues only this one query against `transcription_control`;
/// no writes, no other tables.
pub async fn fetch_enabled_call_ids(pool: &MySqlPool) -> TransflowResult<Vec<CallId>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT call_id FROM transcription_control WHERE is_enabled = true")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(call_id,)| call_id).collect())
}

/// Builds a connection pool for the control table.
pub async fn connect(database_url: &str) -> TransflowResult<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(TransflowError::from)
}

/// Runs the Control Plane Watcher loop until `cancel` fires.
///
/// On a query failure the last-known [`EnabledSet`] is left untouched —
/// already-enabled calls keep running and newly-enabled calls simply wait
/// for the next successful poll — and the poll interval backs off
/// exponentially up to [`MAX_BACKOFF`], resetting to `poll_interval` as soon
/// as a query succeeds again.
pub async fn run(
    pool: MySqlPool,
    enabled: EnabledSet,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut backoff = poll_interval;

    loop {
        match fetch_enabled_call_ids(&pool).await {
            Ok(call_ids) => {
                backoff = poll_interval;
                let (newly_enabled, newly_disabled) =
                    enabled.replace(call_ids.into_iter().collect());
                for call_id in &newly_enabled {
                    tracing::debug!(call_id, "call newly enabled");
                }
                for call_id in &newly_disabled {
                    tracing::debug!(call_id, "call newly disabled");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "control plane query failed, retaining last-known set");
                backoff = (backoff * 2).min(MAX_BACKOFF).max(INITIAL_BACKOFF);
            }
        }

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("control plane watcher shutting down");
                return;
            }
            () = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let mut backoff = INITIAL_BACKOFF;
        for _ in 0..10 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
