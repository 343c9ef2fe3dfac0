//! A programmable packet scheduler built around a tree of PIFO queues.
//!
//! A PIFO (Push-In-First-Out) queue admits entries at a position chosen by a numeric rank and
//! releases strictly from the head. Composing PIFOs into a tree, with packets in the leaves and
//! references to child PIFOs in the interior, lets one engine express FIFO, strict priority,
//! weighted fairness, earliest-deadline-first, rate shaping, and hierarchical combinations of
//! them, purely by programming what rank each packet receives at each level and which PIFO each
//! level enqueues into.
//!
//! The crate provides the scheduling core: the partitioned admission buffer, the tree with its
//! per-node programmable enqueue/dequeue logic, the deferred-operation contract that shaping
//! rides on, and the tracing surface. Packet programs themselves are external; see
//! [`logic::LogicFactory`] for the loading contract and [`policies`] for the built-in
//! reference set.

pub mod buffer;
pub mod collector;
pub mod config;
pub mod error;
pub mod logic;
pub mod packet;
pub mod pifo;
pub mod policies;
pub mod pool;
pub mod runtime;
pub mod scheduler;
pub mod stats;
pub mod time;
pub mod trace;

mod node;
mod tree;

pub use collector::MetricsCollector;
pub use config::{BufferSpec, LogicArtifacts, SchedulerSpec};
pub use error::{ConfigError, DropReason, EnqueueResult, LogicError, SchedError};
pub use logic::{LogicFactory, SchedMeta, MAX_PIFOS};
pub use packet::Packet;
pub use policies::BuiltinLogicFactory;
pub use runtime::{DeferredOp, EventCalendar, Runtime};
pub use scheduler::Scheduler;
pub use stats::Stats;
pub use time::Time;
pub use trace::{ChannelSink, TraceEvent, TraceEventKind, TraceSink};
pub use tree::EntryMark;
