use super::broadcast::Broadcaster;
use super::clock::Clock;
use super::health::PollHealth;
use super::poller::{CheckpointPoller, LogBatch, MAX_LIVE_BATCH};
use crate::store::{DocumentStore, SearchQuery, TimeWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed scheduler is not running")]
    SchedulerStopped,

    #[error("interval {requested:?} outside allowed range {min:?}..={max:?}")]
    InvalidInterval {
        requested: Duration,
        min: Duration,
        max: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedPhase {
    Idle,
    Active,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub state: FeedPhase,
    pub observers: usize,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub watermark: DateTime<Utc>,
    pub health: PollHealth,
}

#[derive(Debug, Clone, Copy)]
pub struct IntervalLimits {
    pub min: Duration,
    pub max: Duration,
}

impl IntervalLimits {
    pub fn check(&self, requested: Duration) -> Result<Duration, FeedError> {
        if requested < self.min || requested > self.max || requested.is_zero() {
            return Err(FeedError::InvalidInterval {
                requested,
                min: self.min,
                max: self.max,
            });
        }
        Ok(requested)
    }
}

/// The only mutable state outside request scope: observer set, cadence and
/// the poller's watermark. Owned by exactly one scheduler task.
pub struct FeedState {
    poller: CheckpointPoller,
    clock: Arc<dyn Clock>,
    observers: HashSet<Uuid>,
    interval: Duration,
    limits: IntervalLimits,
}

impl FeedState {
    pub fn new(
        poller: CheckpointPoller,
        clock: Arc<dyn Clock>,
        interval: Duration,
        limits: IntervalLimits,
    ) -> Self {
        Self {
            poller,
            clock,
            observers: HashSet::new(),
            interval,
            limits,
        }
    }

    pub fn phase(&self) -> FeedPhase {
        if self.observers.is_empty() {
            FeedPhase::Idle
        } else {
            FeedPhase::Active
        }
    }

    pub fn observers(&self) -> usize {
        self.observers.len()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.poller.watermark()
    }

    /// Register an observer. Returns true when this activated the feed, in
    /// which case the watermark has been reset to now.
    pub fn connect(&mut self, id: Uuid) -> bool {
        let activated = self.observers.is_empty();
        if !self.observers.insert(id) {
            return false;
        }
        if activated {
            self.poller.reset(self.clock.now());
        }
        activated
    }

    /// Remove an observer. Unknown ids are ignored so a repeated disconnect
    /// cannot push the count below the true number of observers. Returns true
    /// when this idled the feed.
    pub fn disconnect(&mut self, id: Uuid) -> bool {
        self.observers.remove(&id) && self.observers.is_empty()
    }

    pub fn set_interval(&mut self, requested: Duration) -> Result<Duration, FeedError> {
        self.interval = self.limits.check(requested)?;
        Ok(self.interval)
    }

    /// Poll once if anyone is watching. With no observers this never touches
    /// the store.
    pub async fn tick(&mut self) -> Option<LogBatch> {
        if self.observers.is_empty() {
            self.poller.record_skip();
            return None;
        }
        let now = self.clock.now();
        Some(self.poller.tick(now).await)
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: self.phase(),
            observers: self.observers.len(),
            interval: self.interval,
            watermark: self.poller.watermark(),
            health: self.poller.health().clone(),
        }
    }
}

struct Registration {
    id: Uuid,
    receiver: broadcast::Receiver<Arc<LogBatch>>,
    watermark: DateTime<Utc>,
}

enum Command {
    Subscribe {
        reply: oneshot::Sender<Registration>,
    },
    Unsubscribe {
        id: Uuid,
    },
    SetInterval {
        interval: Duration,
        reply: oneshot::Sender<Result<Duration, FeedError>>,
    },
    Status {
        reply: oneshot::Sender<FeedStatus>,
    },
}

/// Where one-time backfills are read from on subscribe.
#[derive(Clone)]
pub struct BackfillSource {
    pub store: Arc<dyn DocumentStore>,
    pub index: String,
    pub time_field: String,
    pub size: usize,
}

impl BackfillSource {
    /// Most recent documents at or before `until`. The live feed picks up
    /// strictly after `until`, so the two never overlap.
    async fn fetch(&self, until: DateTime<Utc>) -> LogBatch {
        let size = self.size.min(MAX_LIVE_BATCH);
        if size == 0 {
            return LogBatch::empty(None, until);
        }

        let query = SearchQuery::newest_first(&self.time_field, TimeWindow::up_to(until), size);
        match self.store.search(&self.index, &query).await {
            Ok(results) => LogBatch {
                window_start: None,
                window_end: until,
                documents: results.hits,
            },
            Err(e) => {
                warn!(index = %self.index, error = %e, "Backfill failed, starting observer with empty history");
                LogBatch::empty(None, until)
            }
        }
    }
}

/// Cloneable front door to the scheduler task.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<Command>,
    backfill: BackfillSource,
}

impl FeedHandle {
    /// Register an observer and fetch its backfill. The backfill query runs on
    /// the caller's task so it never delays a tick.
    pub async fn subscribe(&self) -> Result<Subscription, FeedError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { reply })
            .map_err(|_| FeedError::SchedulerStopped)?;
        let registration = response.await.map_err(|_| FeedError::SchedulerStopped)?;

        let mut subscription = Subscription {
            id: registration.id,
            backfill: LogBatch::empty(None, registration.watermark),
            receiver: registration.receiver,
            commands: self.commands.clone(),
        };
        subscription.backfill = self.backfill.fetch(registration.watermark).await;
        Ok(subscription)
    }

    /// Change the shared polling cadence. Last writer wins.
    pub async fn set_interval(&self, interval: Duration) -> Result<Duration, FeedError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SetInterval { interval, reply })
            .map_err(|_| FeedError::SchedulerStopped)?;
        response.await.map_err(|_| FeedError::SchedulerStopped)?
    }

    pub async fn status(&self) -> Result<FeedStatus, FeedError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Status { reply })
            .map_err(|_| FeedError::SchedulerStopped)?;
        response.await.map_err(|_| FeedError::SchedulerStopped)
    }
}

/// A registered observer. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    backfill: LogBatch,
    receiver: broadcast::Receiver<Arc<LogBatch>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The one-time history sent before any live batch.
    pub fn take_backfill(&mut self) -> LogBatch {
        let end = self.backfill.window_end;
        std::mem::replace(&mut self.backfill, LogBatch::empty(None, end))
    }

    /// Next live batch, or `None` once the feed has shut down. Batches missed
    /// while this observer lagged are skipped.
    pub async fn recv(&mut self) -> Option<Arc<LogBatch>> {
        loop {
            match self.receiver.recv().await {
                Ok(batch) => return Some(batch),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(observer = %self.id, skipped, "Observer lagging, skipped batches");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Scheduler may already be gone during shutdown.
        let _ = self.commands.send(Command::Unsubscribe { id: self.id });
    }
}

/// Spawn the scheduler task. It owns `state` until `shutdown` flips to true
/// or every handle is dropped.
pub fn spawn_scheduler(
    state: FeedState,
    broadcaster: Broadcaster,
    backfill: BackfillSource,
    shutdown: watch::Receiver<bool>,
) -> (FeedHandle, JoinHandle<()>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    let scheduler = Scheduler {
        state,
        broadcaster,
        timer: None,
    };
    let task = tokio::spawn(scheduler.run(receiver, shutdown));
    (FeedHandle { commands, backfill }, task)
}

struct Scheduler {
    state: FeedState,
    broadcaster: Broadcaster,
    timer: Option<Interval>,
}

impl Scheduler {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.state.interval(), "Feed scheduler started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = next_tick(&mut self.timer) => {
                    // Runs inline: the next tick cannot start until this one
                    // finishes, however slow the store is.
                    if let Some(batch) = self.state.tick().await {
                        if !batch.is_empty() {
                            let observers = self.broadcaster.broadcast(batch);
                            debug!(observers, "Broadcast batch");
                        }
                    }
                }
            }
        }

        self.timer = None;
        info!("Feed scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe { reply } => {
                let id = Uuid::new_v4();
                let receiver = self.broadcaster.subscribe();
                if self.state.connect(id) {
                    self.start_timer();
                    info!(watermark = %self.state.watermark(), "Feed active");
                }
                debug!(observer = %id, observers = self.state.observers(), "Observer connected");

                let registration = Registration {
                    id,
                    receiver,
                    watermark: self.state.watermark(),
                };
                if reply.send(registration).is_err() && self.state.disconnect(id) {
                    // Caller gave up before the registration arrived.
                    self.stop_timer();
                }
            }
            Command::Unsubscribe { id } => {
                if self.state.disconnect(id) {
                    self.stop_timer();
                }
                debug!(observer = %id, observers = self.state.observers(), "Observer disconnected");
            }
            Command::SetInterval { interval, reply } => {
                let result = self.state.set_interval(interval);
                match &result {
                    Ok(interval) => {
                        info!(interval = ?interval, "Polling interval changed");
                        if self.timer.is_some() {
                            self.start_timer();
                        }
                    }
                    Err(e) => warn!(error = %e, "Rejected interval change"),
                }
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.state.status());
            }
        }
    }

    /// Replaces any running timer, so at most one exists.
    fn start_timer(&mut self) {
        let period = self.state.interval();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
    }

    fn stop_timer(&mut self) {
        if self.timer.take().is_some() {
            info!("Feed idle");
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
