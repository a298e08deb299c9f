pub mod broadcast;
pub mod clock;
pub mod health;
pub mod poller;
pub mod scheduler;

pub use broadcast::Broadcaster;
pub use clock::{Clock, ManualClock, SystemClock};
pub use health::PollHealth;
pub use poller::{CheckpointPoller, LogBatch, PollerSettings, MAX_LIVE_BATCH};
pub use scheduler::{
    spawn_scheduler, BackfillSource, FeedError, FeedHandle, FeedPhase, FeedState, FeedStatus,
    IntervalLimits, Subscription,
};
