//! Event stream consumer: order events in, windowed load counters out.

pub mod backoff;
pub mod event;
pub mod processor;
pub mod source;

pub use event::{LoadEvent, SkipReason};
pub use processor::{build_source, Outcome, ProcessorStats, StatsSnapshot, StreamProcessor};
pub use source::{ChannelSource, EventSource, LineSource, WebSocketSource};
