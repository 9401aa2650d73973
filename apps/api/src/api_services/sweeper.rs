use std::time::Duration;

use tempo_application::ThrottleService;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Periodically deletes inert throttle rows in the background.
pub fn spawn_rate_limit_sweeper(service: ThrottleService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match service.sweep().await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "swept inert rate limit windows"),
                Err(error) => warn!(error = %error, "rate limit sweep failed"),
            }
        }
    })
}
