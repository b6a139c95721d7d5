use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use crate::config::HypervisorConfig;
use crate::connection::{Connection, ConnectionState};

/// Connection supervisor loop - pings the hypervisor on a fixed interval so a
/// dropped session is noticed between requests and rebuilt once it answers again.
pub async fn run(
    connection: Arc<Connection>,
    config: HypervisorConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(
        Duration::from_secs(config.supervisor_interval_secs.max(1))
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let before = connection.state();
                let after = connection.probe().await;
                if after == ConnectionState::Lost {
                    tracing::debug!("Hypervisor at {} still unreachable", connection.uri());
                } else if before != after {
                    tracing::info!("Hypervisor connection is {:?}", after);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Connection supervisor shutting down");
                break;
            }
        }
    }

    Ok(())
}
