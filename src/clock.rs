//! The periodic pulse source (spec.md §4.1).
//!
//! Generalizes the teacher's per-request `mpsc`/`oneshot` mailbox
//! (`transfer::channel::{TransferSender, TransferReceiver}`) into a
//! fan-out: one control mailbox accepting Subscribe/Unsubscribe, and one
//! bounded `mpsc::Sender<()>` per subscriber so a slow poller misses pulses
//! instead of blocking the tick loop (spec.md §4.1: "buffered so a slow
//! subscriber misses pulses rather than blocking the clock").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 4;
const COMMAND_MAILBOX_CAPACITY: usize = 32;

enum Command {
    Subscribe {
        reply: oneshot::Sender<(Uuid, mpsc::Receiver<()>)>,
    },
    Unsubscribe {
        id: Uuid,
    },
}

/// Handle to the running clock. Cloning is cheap; the pulse loop exits once
/// the last subscriber unsubscribes, and is respawned lazily by the next
/// subscription (spec.md §4.1: "no goroutine/thread leak when subscriber
/// count returns to zero" and "First subscription starts the loop").
#[derive(Clone)]
pub struct ClockHandle {
    interval: Duration,
    commands: Arc<Mutex<mpsc::Sender<Command>>>,
}

struct ClockTask {
    interval: Duration,
    commands: mpsc::Receiver<Command>,
    subscribers: FxHashMap<Uuid, mpsc::Sender<()>>,
}

impl ClockHandle {
    pub fn start(interval: Duration) -> Self {
        let commands = Self::spawn(interval);
        ClockHandle {
            interval,
            commands: Arc::new(Mutex::new(commands)),
        }
    }

    fn spawn(interval: Duration) -> mpsc::Sender<Command> {
        let (tx, rx) = mpsc::channel(COMMAND_MAILBOX_CAPACITY);
        let task = ClockTask {
            interval,
            commands: rx,
            subscribers: HashMap::default(),
        };
        tokio::spawn(task.run());
        tx
    }

    /// Registers a new subscriber and returns its id plus a receiver that
    /// gets an empty signal every tick. If every previous subscriber had
    /// unsubscribed and the pulse loop already exited, this respawns it
    /// rather than hanging or panicking on the stale mailbox.
    pub async fn subscribe(&self) -> (Uuid, mpsc::Receiver<()>) {
        loop {
            let mut guard = self.commands.lock().await;
            if guard.is_closed() {
                *guard = Self::spawn(self.interval);
            }
            let sender = guard.clone();
            drop(guard);

            let (reply_tx, reply_rx) = oneshot::channel();
            if sender
                .send(Command::Subscribe { reply: reply_tx })
                .await
                .is_err()
            {
                // The task we just spawned (or found alive) exited between
                // our `is_closed` check and this send — retry, which will
                // respawn it again.
                continue;
            }
            match reply_rx.await {
                Ok(subscribed) => return subscribed,
                Err(_) => continue,
            }
        }
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        let sender = self.commands.lock().await.clone();
        let _ = sender.send(Command::Unsubscribe { id }).await;
    }
}

impl ClockTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so subscribers get a
        // full interval before the first pulse.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick(), if !self.subscribers.is_empty() => {
                    self.subscribers.retain(|id, tx| {
                        // Fire-and-forget: a full buffer means the
                        // subscriber missed this pulse, which is fine
                        // (spec.md §4.1) unless the subscriber is gone.
                        match tx.try_send(()) {
                            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!(subscriber = %id, "dropping closed clock subscriber");
                                false
                            }
                        }
                    });
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Subscribe { reply }) => {
                            let id = Uuid::new_v4();
                            let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
                            self.subscribers.insert(id, tx);
                            let _ = reply.send((id, rx));
                        }
                        Some(Command::Unsubscribe { id }) => {
                            self.subscribers.remove(&id);
                            if self.subscribers.is_empty() {
                                debug!("clock has no subscribers left, exiting pulse loop");
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_pulses() {
        let clock = ClockHandle::start(Duration::from_millis(20));
        let (_id, mut rx) = clock.subscribe().await;
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timed out waiting for pulse")
            .expect("channel closed");
    }

    #[tokio::test]
    async fn unsubscribe_stops_pulses() {
        let clock = ClockHandle::start(Duration::from_millis(20));
        let (id, mut rx) = clock.subscribe().await;
        clock.unsubscribe(id).await;
        // Give the task a chance to process the unsubscribe before the
        // channel would otherwise be closed by drop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.recv().await.is_none());
    }

    /// spec.md §4.1 "First subscription starts the loop": once the last
    /// subscriber leaves and the pulse loop exits, a later subscription must
    /// restart it rather than hang or panic on the dead mailbox.
    #[tokio::test]
    async fn resubscribing_after_the_loop_exits_restarts_it() {
        let clock = ClockHandle::start(Duration::from_millis(20));
        let (id, _rx) = clock.subscribe().await;
        clock.unsubscribe(id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_id2, mut rx2) = clock.subscribe().await;
        tokio::time::timeout(Duration::from_millis(200), rx2.recv())
            .await
            .expect("timed out waiting for pulse after resubscribe")
            .expect("channel closed");
    }

    #[tokio::test]
    async fn slow_subscriber_misses_pulses_instead_of_blocking() {
        let clock = ClockHandle::start(Duration::from_millis(10));
        let (_id, mut rx) = clock.subscribe().await;
        // Do not drain rx; wait long enough for several ticks to fire.
        tokio::time::sleep(Duration::from_millis(120)).await;
        // Buffer capacity is 4; we should be able to drain at most a
        // handful of pulses without the clock ever having blocked.
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count <= SUBSCRIBER_CHANNEL_CAPACITY);
    }
}
