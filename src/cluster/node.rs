//! Node identity and the node collection carried by every cluster state

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Data,
}

/// Identity record of a cluster member.
///
/// The default value (all fields empty) is the "no node" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub address: String,
    pub attributes: BTreeMap<String, String>,
    pub roles: BTreeSet<NodeRole>,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        roles: impl IntoIterator<Item = NodeRole>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            attributes: BTreeMap::new(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_master_eligible(&self) -> bool {
        self.roles.contains(&NodeRole::Master)
    }

    pub fn is_data(&self) -> bool {
        self.roles.contains(&NodeRole::Data)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "{{}}")
        } else {
            write!(f, "{{{}}}{{{}}}{{{}}}", self.name, self.id, self.address)
        }
    }
}

/// All known nodes of a cluster state.
///
/// `local_node_id` always resolves to an entry when set; it is rewritten by
/// each receiver because it describes the observer, not the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nodes {
    nodes: BTreeMap<String, Node>,
    master_node_id: Option<String>,
    local_node_id: Option<String>,
}

impl Nodes {
    pub fn builder() -> NodesBuilder {
        NodesBuilder::default()
    }

    /// Builder seeded with a copy of this collection.
    pub fn to_builder(&self) -> NodesBuilder {
        NodesBuilder {
            nodes: self.nodes.clone(),
            master_node_id: self.master_node_id.clone(),
            local_node_id: self.local_node_id.clone(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn data_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_data())
    }

    pub fn master_eligible_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_master_eligible())
    }

    pub fn master_node_id(&self) -> Option<&str> {
        self.master_node_id.as_deref()
    }

    pub fn master_node(&self) -> Option<&Node> {
        self.master_node_id.as_deref().and_then(|id| self.nodes.get(id))
    }

    pub fn local_node_id(&self) -> Option<&str> {
        self.local_node_id.as_deref()
    }

    pub fn local_node(&self) -> Option<&Node> {
        self.local_node_id.as_deref().and_then(|id| self.nodes.get(id))
    }

    pub fn is_local_node_elected_master(&self) -> bool {
        self.local_node_id.is_some() && self.local_node_id == self.master_node_id
    }

    /// Nodes present here but absent from `previous`
    pub fn added_since(&self, previous: &Nodes) -> Vec<Node> {
        self.nodes
            .values()
            .filter(|n| !previous.contains(&n.id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodesBuilder {
    nodes: BTreeMap<String, Node>,
    master_node_id: Option<String>,
    local_node_id: Option<String>,
}

impl NodesBuilder {
    pub fn add(mut self, node: Node) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn remove(mut self, node_id: &str) -> Self {
        self.nodes.remove(node_id);
        if self.master_node_id.as_deref() == Some(node_id) {
            self.master_node_id = None;
        }
        self
    }

    pub fn master_node_id(mut self, id: Option<String>) -> Self {
        self.master_node_id = id;
        self
    }

    /// Sets the local node, inserting it if missing.
    pub fn local_node(mut self, node: Node) -> Self {
        self.local_node_id = Some(node.id.clone());
        self.nodes.entry(node.id.clone()).or_insert(node);
        self
    }

    pub fn build(mut self) -> Nodes {
        if let Some(id) = &self.local_node_id {
            if !self.nodes.contains_key(id) {
                self.local_node_id = None;
            }
        }
        if let Some(id) = &self.master_node_id {
            if !self.nodes.contains_key(id) {
                self.master_node_id = None;
            }
        }
        Nodes {
            nodes: self.nodes,
            master_node_id: self.master_node_id,
            local_node_id: self.local_node_id,
        }
    }
}
