use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use crate::state::AppState;
use crate::{HEALTH_CHECK_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS};

/// Loop de salud del cluster: detecta workers silenciosos, los marca DOWN
/// y reencola sus tareas huérfanas con id fresco.
pub async fn run_health_check(state: AppState) {
    loop {
        sleep(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS)).await;

        let orphans = {
            let mut master = state.inner.lock().unwrap();
            master.expire_dead_workers(
                Utc::now(),
                ChronoDuration::seconds(HEARTBEAT_TIMEOUT_SECS as i64),
            )
        };

        if !orphans.is_empty() {
            info!(count = orphans.len(), "reencolando tareas huérfanas");
            state.enqueue_all(orphans);
        }
    }
}
