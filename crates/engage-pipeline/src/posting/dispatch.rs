//! Push + poll dispatch for the posting worker.
//!
//! A `LISTEN interactions_due` task and an interval ticker both feed
//! [`Trigger`]s into one bounded channel. A single consumer drains whatever
//! has queued up and runs one posting pass per wake-up, so a push and a poll
//! arriving together cost one claim, and passes never overlap.

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::worker::run_posting_pass;
use crate::context::PipelineContext;

const CHANNEL_CAPACITY: usize = 64;
const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Why the consumer woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An interaction was approved; carries its id.
    Notified(i64),
    Poll,
}

/// Queues `trigger` unless the channel is full; a full channel already
/// guarantees a pass. Returns `false` once the consumer is gone.
fn offer(tx: &mpsc::Sender<Trigger>, trigger: Trigger) -> bool {
    match tx.try_send(trigger) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Forwards `NOTIFY interactions_due` payloads as triggers, reconnecting on
/// failure. Returns when the consumer side closes.
pub async fn listen_for_due(pool: PgPool, tx: mpsc::Sender<Trigger>) {
    loop {
        match PgListener::connect_with(&pool).await {
            Ok(mut listener) => {
                if let Err(e) = listener.listen(engage_db::INTERACTIONS_DUE_CHANNEL).await {
                    tracing::warn!(error = %e, "dispatch: LISTEN failed");
                } else {
                    tracing::info!(
                        channel = engage_db::INTERACTIONS_DUE_CHANNEL,
                        "dispatch: listening for due interactions"
                    );
                    loop {
                        match listener.recv().await {
                            Ok(notification) => {
                                let trigger = notification
                                    .payload()
                                    .parse::<i64>()
                                    .map_or(Trigger::Poll, Trigger::Notified);
                                if !offer(&tx, trigger) {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "dispatch: listener connection lost");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "dispatch: listener connect failed"),
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(LISTEN_RETRY_DELAY).await;
    }
}

/// Emits [`Trigger::Poll`] every `every`, catching rows whose notification
/// was missed or whose reschedule time has come.
pub async fn poll_ticker(every: Duration, tx: mpsc::Sender<Trigger>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if !offer(&tx, Trigger::Poll) {
            return;
        }
    }
}

/// Runs `pass` once per wake-up, coalescing every trigger queued by then.
/// Returns the number of passes run once all producers are gone.
pub async fn run_consumer<F, Fut>(mut rx: mpsc::Receiver<Trigger>, mut pass: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut passes = 0;
    while let Some(first) = rx.recv().await {
        let mut notified = usize::from(matches!(first, Trigger::Notified(_)));
        let mut coalesced = 1usize;
        while let Ok(trigger) = rx.try_recv() {
            coalesced += 1;
            notified += usize::from(matches!(trigger, Trigger::Notified(_)));
        }
        tracing::debug!(coalesced, notified, "dispatch: running posting pass");
        pass().await;
        passes += 1;
    }
    passes
}

/// Handles for the dispatcher's three tasks.
#[derive(Debug)]
pub struct Dispatcher {
    pub listener: JoinHandle<()>,
    pub ticker: JoinHandle<()>,
    pub consumer: JoinHandle<usize>,
}

impl Dispatcher {
    pub fn abort(&self) {
        self.listener.abort();
        self.ticker.abort();
        self.consumer.abort();
    }
}

/// Starts the listener, the poll ticker and the consumer on the runtime.
#[must_use]
pub fn spawn_dispatcher(ctx: PipelineContext) -> Dispatcher {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let listener = tokio::spawn(listen_for_due(ctx.pool.clone(), tx.clone()));
    let ticker = tokio::spawn(poll_ticker(ctx.settings.poll_interval, tx));
    let consumer = tokio::spawn(async move {
        run_consumer(rx, || {
            let ctx = ctx.clone();
            async move {
                match run_posting_pass(&ctx).await {
                    Ok(summary) if summary.claimed > 0 => {
                        tracing::info!(
                            posted = summary.posted,
                            rescheduled = summary.rescheduled,
                            failed = summary.failed,
                            "dispatch: pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "dispatch: posting pass failed"),
                }
            }
        })
        .await
    });

    Dispatcher {
        listener,
        ticker,
        consumer,
    }
}
