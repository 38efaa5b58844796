//! Operational notifications: a bounded drop-oldest queue fed by any task,
//! drained by one flush loop that batches per destination channel.

pub mod config;
pub mod flush;
pub mod queue;
pub mod throttled;

pub use config::{spawn_config_watcher, ChannelConfig, NotifierConfig, NotifyChannel};
pub use flush::{FlushReport, NotificationFlusher};
pub use queue::{NotificationItem, NotificationQueue};
pub use throttled::{ThrottleConfig, ThrottledSink};
