//! Declarative scheduler configuration.
//!
//! A scheduler is described by one JSON document naming the classification logic, the buffer
//! partitioning, the tree shape, and each node's PIFO count and logic artifacts:
//!
//! ```json
//! {
//!   "class-logic":   ["class.json", "class-commands.txt"],
//!   "buffer-config": {
//!       "num-bufIDs": 2,
//!       "partition-sizes": [1048576, 524288],
//!       "bufID-map": { "0": [0], "1": [0, 1] }
//!   },
//!   "num-nodes": 3,
//!   "tree":      { "0": [1, 2] },
//!   "num-pifos": { "0": 1, "1": 1, "2": 1 },
//!   "enq-logic": { "0": ["enq0.json", ""], "1": ["enq1.json", ""], "2": ["enq2.json", ""] },
//!   "deq-logic": { "0": ["deq0.json", ""], "1": ["", ""], "2": ["", ""] }
//! }
//! ```
//!
//! The artifact strings are opaque here; a [`crate::logic::LogicFactory`] assigns them meaning
//! when the scheduler is built. Validation covers everything that can be checked without
//! loading logic: every node appears in every per-node section, the tree is a single tree
//! rooted at node 0, and the buffer map only references partitions that exist.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One logic entry: the program artifact and its table-command artifact, passed verbatim.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LogicArtifacts(pub String, pub String);

impl LogicArtifacts {
    pub fn new(program: impl Into<String>, commands: impl Into<String>) -> LogicArtifacts {
        LogicArtifacts(program.into(), commands.into())
    }

    pub fn program(&self) -> &str {
        &self.0
    }

    pub fn commands(&self) -> &str {
        &self.1
    }
}

/// Buffer section of the configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BufferSpec {
    #[serde(rename = "num-bufIDs")]
    pub num_buf_ids: u32,
    /// Byte limit of each partition; the length of this list is the partition count.
    #[serde(rename = "partition-sizes")]
    pub partition_sizes: Vec<u32>,
    /// buffer id → partition indices tried in order.
    #[serde(rename = "bufID-map")]
    pub buf_id_map: BTreeMap<String, Vec<u32>>,
}

/// Top-level scheduler configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchedulerSpec {
    #[serde(rename = "class-logic")]
    pub class_logic: LogicArtifacts,
    #[serde(rename = "buffer-config")]
    pub buffer_config: BufferSpec,
    #[serde(rename = "num-nodes")]
    pub num_nodes: u32,
    /// parent id → child ids, in child order. Leaves are omitted. Node 0 is the root.
    #[serde(default)]
    pub tree: BTreeMap<String, Vec<u32>>,
    #[serde(rename = "num-pifos")]
    pub num_pifos: BTreeMap<String, u32>,
    #[serde(rename = "enq-logic")]
    pub enq_logic: BTreeMap<String, LogicArtifacts>,
    #[serde(rename = "deq-logic")]
    pub deq_logic: BTreeMap<String, LogicArtifacts>,
}

/// The configuration after structural validation, with numeric keys resolved.
pub(crate) struct ValidatedSpec {
    pub class_logic: LogicArtifacts,
    pub partition_sizes: Vec<u32>,
    pub buffer_map: std::collections::HashMap<u32, Vec<u32>>,
    /// Indexed by node id.
    pub num_pifos: Vec<u32>,
    pub enq_logic: Vec<LogicArtifacts>,
    pub deq_logic: Vec<LogicArtifacts>,
    /// `(parent, children)` pairs in ascending parent order.
    pub edges: Vec<(u32, Vec<u32>)>,
}

impl SchedulerSpec {
    pub fn from_json(json: &str) -> Result<SchedulerSpec, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn validate(&self) -> Result<ValidatedSpec, ConfigError> {
        if self.num_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }

        let num_pifos = per_node_map(&self.num_pifos, self.num_nodes, "num-pifos")?;
        let enq_logic = per_node_map(&self.enq_logic, self.num_nodes, "enq-logic")?;
        let deq_logic = per_node_map(&self.deq_logic, self.num_nodes, "deq-logic")?;

        for (node, &k) in num_pifos.iter().enumerate() {
            if k == 0 {
                return Err(ConfigError::NoPifos { node: node as u32 });
            }
            if k as usize > crate::logic::MAX_PIFOS {
                tracing::warn!(
                    node,
                    pifos = k,
                    "node has more PIFOs than dequeue logic can observe"
                );
            }
        }

        let edges = self.validate_tree()?;
        let buffer_map = self.validate_buffer()?;

        Ok(ValidatedSpec {
            class_logic: self.class_logic.clone(),
            partition_sizes: self.buffer_config.partition_sizes.clone(),
            buffer_map,
            num_pifos,
            enq_logic,
            deq_logic,
            edges,
        })
    }

    fn validate_tree(&self) -> Result<Vec<(u32, Vec<u32>)>, ConfigError> {
        let mut parent_of: Vec<Option<u32>> = vec![None; self.num_nodes as usize];
        let mut edges = Vec::new();

        for (key, children) in &self.tree {
            let parent = parse_key(key, "tree")?;
            if parent >= self.num_nodes {
                return Err(ConfigError::UnknownNode {
                    node: parent,
                    section: "tree",
                });
            }
            for &child in children {
                if child >= self.num_nodes {
                    return Err(ConfigError::UnknownNode {
                        node: child,
                        section: "tree",
                    });
                }
                if child == 0 {
                    return Err(ConfigError::RootHasParent);
                }
                if let Some(first) = parent_of[child as usize] {
                    return Err(ConfigError::DuplicateParent {
                        node: child,
                        first,
                        second: parent,
                    });
                }
                parent_of[child as usize] = Some(parent);
            }
            edges.push((parent, children.clone()));
        }

        // Single-parent plus every non-root parented means acyclic and rooted at 0: following
        // parents from any node strictly consumes unvisited nodes and can only stop at 0.
        for node in 1..self.num_nodes {
            let mut cursor = node;
            let mut hops = 0;
            loop {
                match parent_of[cursor as usize] {
                    None if cursor == 0 => break,
                    None => return Err(ConfigError::Unreachable { node }),
                    Some(up) => {
                        cursor = up;
                        hops += 1;
                        if hops > self.num_nodes {
                            return Err(ConfigError::Unreachable { node });
                        }
                    }
                }
            }
        }

        edges.sort_by_key(|(parent, _)| *parent);
        Ok(edges)
    }

    fn validate_buffer(&self) -> Result<std::collections::HashMap<u32, Vec<u32>>, ConfigError> {
        let partitions = self.buffer_config.partition_sizes.len() as u32;
        let mut map = std::collections::HashMap::new();

        for id in 0..self.buffer_config.num_buf_ids {
            let key = id.to_string();
            let list = self
                .buffer_config
                .buf_id_map
                .get(&key)
                .ok_or(ConfigError::MissingBufferId(id))?;
            if list.is_empty() {
                return Err(ConfigError::EmptyPartitionList { buffer_id: id });
            }
            for &partition in list {
                if partition >= partitions {
                    return Err(ConfigError::UnknownPartition {
                        buffer_id: id,
                        partition,
                    });
                }
            }
            map.insert(id, list.clone());
        }
        Ok(map)
    }
}

/// Resolve a `node id → value` JSON map into a dense vector, requiring every node to appear.
fn per_node_map<T: Clone>(
    map: &BTreeMap<String, T>,
    num_nodes: u32,
    section: &'static str,
) -> Result<Vec<T>, ConfigError> {
    for key in map.keys() {
        let node = parse_key(key, section)?;
        if node >= num_nodes {
            return Err(ConfigError::UnknownNode { node, section });
        }
    }
    (0..num_nodes)
        .map(|node| {
            map.get(&node.to_string())
                .cloned()
                .ok_or(ConfigError::MissingNode { node, section })
        })
        .collect()
}

fn parse_key(key: &str, section: &'static str) -> Result<u32, ConfigError> {
    key.parse().map_err(|_| ConfigError::BadKey {
        key: key.to_string(),
        section,
    })
}
