//! Fixed-period generate-and-publish loop
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use rand::Rng;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::{
    error::PublishError,
    generator::Generator,
    publisher::{Ack, Publish},
};

#[derive(Debug)]
pub enum TickOutcome {
    Published(Ack),
    Failed(PublishError),
    /// previous cycle still running, nothing was generated
    Skipped,
}

/// Clears the in-progress flag even when the tick future is dropped midway
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler<R: Rng, P> {
    generator: Mutex<Generator<R>>,
    publisher: P,
    period: Duration,
    in_progress: AtomicBool,
}

impl<R, P> Scheduler<R, P>
where
    R: Rng + Send,
    P: Publish,
{
    pub fn new(generator: Generator<R>, publisher: P, period: Duration) -> Scheduler<R, P> {
        Scheduler {
            generator: Mutex::new(generator),
            publisher,
            period,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// One generate-and-publish cycle. Never overlaps with another cycle.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("previous cycle still in progress, skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = CycleGuard(&self.in_progress);

        let tx = self
            .generator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .generate();
        let id = tx.transaction_id.clone();
        match self.publisher.publish(tx).await {
            Ok(ack) => {
                info!(
                    transaction_id = %id,
                    partition = ack.partition,
                    offset = ack.offset,
                    "Sent transaction"
                );
                TickOutcome::Published(ack)
            }
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "publish failed, waiting for next tick");
                TickOutcome::Failed(e)
            }
        }
    }

    /// Ticks every period until `shutdown` resolves. A tick already running
    /// is always allowed to finish.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        info!(period = ?self.period, "scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
        info!("scheduler stopped");
    }
}
