//! Application orchestrator: wires the relay components together.

use std::sync::Arc;
use std::time::Duration;

use hackchat_protocol::Message;
use hackchat_relay_server::{RelayServer, RoomRegistry, ServerConfig};
use hackchat_transfer::{ManagerConfig, TransferError, TransferManager};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::handler::RelayHandler;

/// Runs the relay until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let transfers = Arc::new(TransferManager::new(ManagerConfig {
        max_file_size: config.max_file_size,
        transfer_ttl: config.transfer_ttl(),
    }));
    let rooms = Arc::new(RoomRegistry::new());

    // -- WS server --
    let handler = Arc::new(RelayHandler::new(
        Arc::clone(&rooms),
        Arc::clone(&transfers),
        config.purge_on_disconnect,
    ));
    let server_config = ServerConfig {
        port: config.port,
        max_message_size: config.max_message_size,
    };
    let server = RelayServer::new(server_config, handler, Arc::clone(&rooms));
    let server_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move { server_run.run().await });

    // -- Expiry sweep --
    let sweeper = tokio::spawn(sweep_loop(
        Arc::clone(&transfers),
        Arc::clone(&rooms),
        config.sweep_interval(),
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    cancel.cancel();
    server.shutdown();
    let _ = sweeper.await;
    server_task.await??;
    Ok(())
}

/// Periodically evicts idle transfers until cancelled.
async fn sweep_loop(
    transfers: Arc<TransferManager>,
    rooms: Arc<RoomRegistry>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                sweep_once(&transfers, &rooms).await;
            }
        }
    }
}

/// Evicts idle transfers and tells each owner that is still connected.
///
/// Returns the number of evicted transfers.
async fn sweep_once(transfers: &TransferManager, rooms: &RoomRegistry) -> usize {
    let expired = transfers.expire_idle().await;
    for t in &expired {
        let err = TransferError::Expired(t.id.clone());
        let notice =
            Message::transfer_error("", err.kind(), err.client_message(), err.transfer_id());
        if rooms.emit_to(&t.owner, notice).await.is_err() {
            tracing::debug!(transfer_id = %t.id, owner = %t.owner, "owner gone, expiry not delivered");
        }
    }
    expired.len()
}
