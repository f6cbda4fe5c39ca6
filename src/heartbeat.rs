use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::message::{Message, kind};
use crate::transport::TransportSender;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic liveness ticker. Started after readiness has been announced on
/// the first connect; a single ticker persists across reconnects.
pub(crate) struct HeartBeat {
    ticker: JoinHandle<()>,
}

impl HeartBeat {
    pub(crate) fn start(sender: TransportSender, node_id: String) -> Self {
        let ticker = tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                sender.send(Message::control(kind::HEARTBEAT, &node_id));
            }
        });
        debug!("Heartbeat ticker started");
        Self { ticker }
    }

    pub(crate) fn dispose(&self) {
        self.ticker.abort();
    }
}
