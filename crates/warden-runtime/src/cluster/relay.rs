use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::cluster::{GuildId, NodeAction, NodeCommand};

use super::heartbeat::MIN_PERIOD;
use super::store::{CoordinationStore, StoreResult};

/// Consumes instructions other nodes left for this node in the relay table.
pub struct CommandRelay {
    store: Arc<dyn CoordinationStore>,
    guild: GuildId,
    node: String,
    poll_interval: Duration,
    actions: mpsc::Sender<NodeAction>,
}

impl CommandRelay {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        guild: GuildId,
        node: impl Into<String>,
        poll_interval: Duration,
        actions: mpsc::Sender<NodeAction>,
    ) -> Self {
        Self {
            store,
            guild,
            node: node.into(),
            poll_interval: poll_interval.max(MIN_PERIOD),
            actions,
        }
    }

    /// Take pending instructions and forward the ones this node understands.
    pub async fn poll_once(&self) -> StoreResult<usize> {
        let payloads = self.store.take_commands(self.guild, &self.node).await?;
        let mut forwarded = 0;

        for payload in payloads {
            let command = match NodeCommand::from_json(payload.clone()) {
                Ok(command) => command,
                Err(e) => {
                    warn!(error = %e, payload = %payload, "Dropping malformed relay payload");
                    continue;
                }
            };

            let Some(action) = command.action() else {
                warn!(method = %command.method, object = %command.object, "Dropping unknown relay command");
                continue;
            };

            info!(action = ?action, "Received instruction from master");
            if self.actions.send(action).await.is_err() {
                warn!("Upgrade handler has stopped, dropping instruction");
                break;
            }
            forwarded += 1;
        }

        Ok(forwarded)
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if let Err(e) = self.poll_once().await {
                debug!(error = %e, "Relay poll failed");
            }
        }

        debug!("Command relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCoordinationStore;
    use serde_json::json;

    const GUILD: GuildId = GuildId(9);

    #[tokio::test]
    async fn test_forwards_upgrade_and_drops_unknown() {
        let store = Arc::new(MemoryCoordinationStore::new());
        store
            .enqueue_command(GUILD, "alpha", &NodeCommand::upgrade())
            .await
            .unwrap();
        store
            .enqueue_command(
                GUILD,
                "alpha",
                &NodeCommand {
                    command: "rpc".into(),
                    object: "Server".into(),
                    method: "start".into(),
                    params: json!({"server": "training"}),
                },
            )
            .await
            .unwrap();
        store
            .enqueue_command(GUILD, "beta", &NodeCommand::upgrade())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let relay = CommandRelay::new(store.clone(), GUILD, "alpha", Duration::from_secs(1), tx);

        assert_eq!(relay.poll_once().await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), NodeAction::Upgrade);
        assert!(rx.try_recv().is_err());

        // Consumed rows are gone; other nodes' rows stay.
        assert_eq!(relay.poll_once().await.unwrap(), 0);
        assert_eq!(store.pending_commands(GUILD).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_cancelled() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let (tx, mut rx) = mpsc::channel(8);
        let relay = Arc::new(CommandRelay::new(
            store.clone(),
            GUILD,
            "alpha",
            Duration::from_secs(2),
            tx,
        ));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let relay = relay.clone();
            let cancel = cancel.clone();
            async move { relay.run(cancel).await }
        });

        store
            .enqueue_command(GUILD, "alpha", &NodeCommand::upgrade())
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(NodeAction::Upgrade));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_zero_poll_interval_is_floored() {
        let (tx, _rx) = mpsc::channel(1);
        let relay = CommandRelay::new(
            Arc::new(MemoryCoordinationStore::new()),
            GUILD,
            "alpha",
            Duration::ZERO,
            tx,
        );
        assert_eq!(relay.poll_interval, Duration::from_secs(1));
    }
}
