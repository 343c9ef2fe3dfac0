//! Error taxonomy for configuration and scheduling.

use thiserror::Error;

/// Reasons a packet can be refused admission.
///
/// Every drop carries one of these tags all the way to the tracing surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum DropReason {
    /// No partition reachable from the packet's buffer id had room.
    BufferFull,
    /// A level of the enqueue cascade rejected the packet; lower levels were rolled back.
    TreeReject,
}

/// Outcome of [`crate::Scheduler::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueResult {
    Admitted,
    Dropped { reason: DropReason },
}

impl EnqueueResult {
    pub fn is_admitted(&self) -> bool {
        matches!(self, EnqueueResult::Admitted)
    }
}

/// Errors raised while building a scheduler from its declarative configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration declares no nodes")]
    NoNodes,

    #[error("node {node} is missing from `{section}`")]
    MissingNode { node: u32, section: &'static str },

    #[error("`{section}` references unknown node {node}")]
    UnknownNode { node: u32, section: &'static str },

    #[error("`{section}` contains non-numeric key `{key}`")]
    BadKey { key: String, section: &'static str },

    #[error("node {node} must have at least one PIFO")]
    NoPifos { node: u32 },

    #[error("node {node} is listed as a child of both node {first} and node {second}")]
    DuplicateParent { node: u32, first: u32, second: u32 },

    #[error("the root node must not appear as a child")]
    RootHasParent,

    #[error("node {node} is unreachable from the root")]
    Unreachable { node: u32 },

    #[error("`bufID-map` is missing buffer id {0}")]
    MissingBufferId(u32),

    #[error("buffer id {buffer_id} lists no partitions")]
    EmptyPartitionList { buffer_id: u32 },

    #[error("buffer id {buffer_id} references unknown partition {partition}")]
    UnknownPartition { buffer_id: u32, partition: u32 },

    #[error("the root node has {pifos} PIFOs but no dequeue logic to select among them")]
    RootNeedsDequeueLogic { pifos: usize },

    #[error("failed to load {kind} logic for node {node}: {source}")]
    NodeLogic {
        node: u32,
        kind: &'static str,
        source: LogicError,
    },

    #[error("failed to load classification logic: {0}")]
    ClassLogic(#[source] LogicError),
}

/// Error returned by a [`crate::logic::LogicFactory`] that cannot produce an instance
/// for the given artifact pair.
#[derive(Debug, Error)]
#[error("unusable logic artifact `{artifact}`: {reason}")]
pub struct LogicError {
    pub artifact: String,
    pub reason: String,
}

impl LogicError {
    pub fn new(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        LogicError {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}

/// Fatal runtime errors.
///
/// These indicate a broken configuration or a misbehaving logic program, never ordinary
/// traffic conditions. Traffic conditions surface as [`DropReason`] or an empty dequeue,
/// not as errors.
#[derive(Debug, Error)]
pub enum SchedError {
    /// Admission was attempted with a buffer id absent from the buffer map.
    #[error("unknown buffer id {0}")]
    UnknownBufferId(u32),

    /// Classification selected a node that does not exist.
    #[error("classification selected nonexistent node {0}")]
    UnknownLeaf(u32),

    /// Classification selected an interior node as an enqueue target.
    #[error("node {0} is not a leaf and cannot accept packets")]
    NotALeaf(u32),

    /// An interior enqueue arrived from a node that is not a child of the target.
    #[error("node {node}: enqueue from node {child} which is not one of its children")]
    UnknownChild { node: u32, child: u32 },

    /// A popped interior entry referenced a child index outside the node's child list.
    #[error("node {node}: popped entry references child slot {slot} out of range")]
    InvalidChildRef { node: u32, slot: u8 },

    /// A buffer release did not match what was admitted.
    #[error("partition {partition}: release of {pkt_len} bytes exceeds {used} bytes in use")]
    ReleaseUnderflow {
        partition: u32,
        pkt_len: u32,
        used: u32,
    },

    /// A partition index outside the configured range was used.
    #[error("partition {0} is out of range")]
    PartitionOutOfRange(u32),

    /// A deferred operation referenced a node that does not exist.
    #[error("deferred operation references nonexistent node {0}")]
    UnknownDeferredNode(u32),
}
