use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::interval;
use tokio_stream::wrappers::IntervalStream;

use crate::observer::Observer;
use crate::format::decimal_u32;
use crate::resources::{Reply, Representation};
use crate::server::MessageSender;
use crate::state::NodeState;

/// Periodically pushes a tick count to the observers of one resource.
pub struct Notifier {
    state: Arc<NodeState>,
    observer: Arc<Mutex<Observer>>,
    sender: MessageSender,
    path: String,
    period: Duration,
}

impl Notifier {
    pub fn new(
        state: Arc<NodeState>,
        observer: Arc<Mutex<Observer>>,
        sender: MessageSender,
        path: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            state,
            observer,
            sender,
            path: path.into(),
            period,
        }
    }

    /// Ticks until `shutdown` changes or its sender goes away. The first
    /// tick fires immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = IntervalStream::new(interval(self.period)).fuse();
        info!("notifying observers of {} every {:?}", self.path, self.period);

        loop {
            tokio::select! {
                Some(_) = timer.next() => {
                    self.notify_once().await;
                }
                _ = shutdown.changed() => {
                    debug!("notifier stopped");
                    return;
                }
            }
        }
    }

    /// Runs one period and returns the number of notifications handed to
    /// the server.
    pub async fn notify_once(&self) -> usize {
        let tick = self.state.tick();
        debug!("tick {}", tick);

        let mut observer = self.observer.lock().await;
        if !observer.is_observed(&self.path) {
            return 0;
        }

        // observers receive the tick count
        let reply: Reply = Representation::text(decimal_u32(tick)).into();

        let state = &self.state;
        let messages = observer.notifications(&self.path, &reply, || state.next_message_id());
        drop(observer);

        let mut sent = 0;
        for message in messages {
            if self.sender.send(message).is_err() {
                warn!("server gone, dropping notification");
                break;
            }
            sent += 1;
        }
        sent
    }
}
