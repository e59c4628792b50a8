//! Control-flow graph model.
//!
//! Nodes and edges live in flat arenas owned by [`Graph`] and refer to each
//! other through [`NodeId`]/[`EdgeId`] indices, so a graph never holds
//! reference cycles and can be traversed in either direction. Each node is
//! identified by a [`NodeKey`]: its content hash plus an instance id assigned by
//! the graph's [`NodeHashMap`] when hashes collide.

pub mod store;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use store::NodeHashMap;

/// Module name used for nodes whose owning module could not be resolved.
pub const UNKNOWN_MODULE: &str = "__unknown__";

/// Stable handle to a node inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Stable handle to an edge inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub usize);

/// Identity of a node: content hash plus collision instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub hash: u64,
    pub instance: u32,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}#{}", self.hash, self.instance)
    }
}

/// Kind of block a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetaNodeType {
    Normal,
    Return,
    Singleton,
    Trampoline,
    ModuleEntry,
    ModuleExit,
    SignatureHash,
}

impl MetaNodeType {
    pub const ALL: [MetaNodeType; 7] = [
        MetaNodeType::Normal,
        MetaNodeType::Return,
        MetaNodeType::Singleton,
        MetaNodeType::Trampoline,
        MetaNodeType::ModuleEntry,
        MetaNodeType::ModuleExit,
        MetaNodeType::SignatureHash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetaNodeType::Normal => "normal",
            MetaNodeType::Return => "return",
            MetaNodeType::Singleton => "singleton",
            MetaNodeType::Trampoline => "trampoline",
            MetaNodeType::ModuleEntry => "module-entry",
            MetaNodeType::ModuleExit => "module-exit",
            MetaNodeType::SignatureHash => "signature-hash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Numeric code used by the binary trace streams.
    pub fn code(&self) -> u8 {
        match self {
            MetaNodeType::Normal => 0,
            MetaNodeType::Return => 1,
            MetaNodeType::Singleton => 2,
            MetaNodeType::Trampoline => 3,
            MetaNodeType::ModuleEntry => 4,
            MetaNodeType::ModuleExit => 5,
            MetaNodeType::SignatureHash => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Boundary nodes are identified by their hash alone; their tag carries no position.
    pub fn is_boundary(&self) -> bool {
        matches!(
            self,
            MetaNodeType::ModuleEntry | MetaNodeType::ModuleExit | MetaNodeType::SignatureHash
        )
    }
}

/// Kind of control transfer an edge records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeType {
    Direct,
    Indirect,
    CallContinuation,
    ExceptionContinuation,
    UnexpectedReturn,
    GencodePerm,
    GencodeWrite,
}

impl EdgeType {
    pub const ALL: [EdgeType; 7] = [
        EdgeType::Direct,
        EdgeType::Indirect,
        EdgeType::CallContinuation,
        EdgeType::ExceptionContinuation,
        EdgeType::UnexpectedReturn,
        EdgeType::GencodePerm,
        EdgeType::GencodeWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Direct => "direct",
            EdgeType::Indirect => "indirect",
            EdgeType::CallContinuation => "call-continuation",
            EdgeType::ExceptionContinuation => "exception-continuation",
            EdgeType::UnexpectedReturn => "unexpected-return",
            EdgeType::GencodePerm => "gencode-perm",
            EdgeType::GencodeWrite => "gencode-write",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn code(&self) -> u8 {
        match self {
            EdgeType::Direct => 0,
            EdgeType::Indirect => 1,
            EdgeType::CallContinuation => 2,
            EdgeType::ExceptionContinuation => 3,
            EdgeType::UnexpectedReturn => 4,
            EdgeType::GencodePerm => 5,
            EdgeType::GencodeWrite => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Edges whose target is fixed by the source block's code.
    ///
    /// Two blocks that are the same block must agree on these targets.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            EdgeType::Direct | EdgeType::CallContinuation | EdgeType::ExceptionContinuation
        )
    }
}

/// Errors raised while building a graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Edge endpoint {node} does not exist (graph has {node_count} nodes)")]
    UnknownNode { node: usize, node_count: usize },

    #[error("Node {key} already has a call continuation")]
    DuplicateContinuation { key: NodeKey },
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Attributes for a node about to be added to a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hash: u64,
    pub module: String,
    /// Module-relative position of the block.
    #[serde(default)]
    pub tag: u64,
    #[serde(default)]
    pub version: u8,
    pub kind: MetaNodeType,
}

impl NodeSpec {
    pub fn new(hash: u64, module: impl Into<String>, kind: MetaNodeType) -> Self {
        Self { hash, module: module.into(), tag: 0, version: 0, kind }
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    key: NodeKey,
    module: String,
    tag: u64,
    version: u8,
    kind: MetaNodeType,
    outgoing: Vec<EdgeId>,
    incoming: Vec<EdgeId>,
}

impl Node {
    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn hash(&self) -> u64 {
        self.key.hash
    }

    pub fn instance(&self) -> u32 {
        self.key.instance
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn kind(&self) -> MetaNodeType {
        self.kind
    }

    pub fn outgoing(&self) -> &[EdgeId] {
        &self.outgoing
    }

    pub fn incoming(&self) -> &[EdgeId] {
        &self.incoming
    }

    fn spec(&self) -> NodeSpec {
        NodeSpec {
            hash: self.key.hash,
            module: self.module.clone(),
            tag: self.tag,
            version: self.version,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeType,
    /// Branch-site index distinguishing multiple targets of one source.
    pub ordinal: u32,
}

type TagIndexKey = (String, u64, u8);

/// Arena-backed control-flow graph.
///
/// Nodes and edges are append-only: ids handed out stay valid for the life of
/// the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphData", into = "GraphData")]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    store: NodeHashMap,
    by_tag: HashMap<TagIndexKey, NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node, assigning its instance id from the collision list for its hash.
    pub fn add_node(&mut self, spec: NodeSpec) -> NodeId {
        let id = NodeId(self.nodes.len());
        let key = self.store.insert(spec.hash, id);
        if !spec.kind.is_boundary() {
            self.by_tag.entry((spec.module.clone(), spec.tag, spec.version)).or_insert(id);
        }
        self.nodes.push(Node {
            key,
            module: spec.module,
            tag: spec.tag,
            version: spec.version,
            kind: spec.kind,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        });
        id
    }

    /// Attach a typed edge between two existing nodes.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        kind: EdgeType,
        ordinal: u32,
    ) -> GraphResult<EdgeId> {
        for endpoint in [from, to] {
            if endpoint.0 >= self.nodes.len() {
                return Err(GraphError::UnknownNode {
                    node: endpoint.0,
                    node_count: self.nodes.len(),
                });
            }
        }
        if kind == EdgeType::CallContinuation && self.continuation_edge(from).is_some() {
            return Err(GraphError::DuplicateContinuation { key: self.nodes[from.0].key });
        }
        Ok(self.push_edge(Edge { from, to, kind, ordinal }))
    }

    /// Append an edge whose endpoints the caller has already validated.
    pub(crate) fn push_edge(&mut self, edge: Edge) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.nodes[edge.from.0].outgoing.push(id);
        self.nodes[edge.to.0].incoming.push(id);
        self.edges.push(edge);
        id
    }

    /// Access a node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Access an edge by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this graph.
    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes.iter().enumerate().map(|(idx, node)| (NodeId(idx), node))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.edges.iter().enumerate().map(|(idx, edge)| (EdgeId(idx), edge))
    }

    pub fn outgoing_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.nodes[id.0].outgoing.iter().map(move |edge| &self.edges[edge.0])
    }

    pub fn incoming_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.nodes[id.0].incoming.iter().map(move |edge| &self.edges[edge.0])
    }

    /// The node's unique call-continuation edge, if it has one.
    pub fn continuation_edge(&self, id: NodeId) -> Option<&Edge> {
        self.outgoing_edges(id).find(|edge| edge.kind == EdgeType::CallContinuation)
    }

    /// First edge from `from` to `to`, if any.
    pub fn find_edge(&self, from: NodeId, to: NodeId) -> Option<&Edge> {
        self.outgoing_edges(from).find(|edge| edge.to == to)
    }

    /// Collision list for `hash`.
    pub fn lookup_by_hash(&self, hash: u64) -> Vec<NodeId> {
        self.store.lookup_by_hash(hash)
    }

    pub fn lookup_by_key(&self, key: NodeKey) -> Option<NodeId> {
        self.store.lookup_by_key(key)
    }

    pub fn store(&self) -> &NodeHashMap {
        &self.store
    }

    /// Locate the block at a module-relative position. Boundary nodes are not indexed.
    pub fn find_by_tag(&self, module: &str, tag: u64, version: u8) -> Option<NodeId> {
        self.by_tag.get(&(module.to_string(), tag, version)).copied()
    }

    /// Weakly connected groups of trampoline (dynamically generated) nodes.
    ///
    /// Only edges whose endpoints are both trampolines join a group. Groups are
    /// ordered by their lowest node id and list members in ascending id order.
    pub fn trampoline_regions(&self) -> Vec<Vec<NodeId>> {
        let mut region_of: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut regions: Vec<Vec<NodeId>> = Vec::new();

        for (start, node) in self.nodes() {
            if node.kind != MetaNodeType::Trampoline || region_of[start.0].is_some() {
                continue;
            }
            let region_idx = regions.len();
            let mut members = Vec::new();
            let mut stack = vec![start];
            region_of[start.0] = Some(region_idx);
            while let Some(current) = stack.pop() {
                members.push(current);
                let neighbors = self
                    .outgoing_edges(current)
                    .map(|edge| edge.to)
                    .chain(self.incoming_edges(current).map(|edge| edge.from))
                    .collect::<Vec<_>>();
                for next in neighbors {
                    if self.nodes[next.0].kind == MetaNodeType::Trampoline
                        && region_of[next.0].is_none()
                    {
                        region_of[next.0] = Some(region_idx);
                        stack.push(next);
                    }
                }
            }
            members.sort_unstable();
            regions.push(members);
        }

        regions
    }

    /// SHA-256 over a canonical rendering of every node and edge in id order.
    ///
    /// Two graphs with equal digests hold the same nodes, keys and edges.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for node in &self.nodes {
            hasher.update(
                format!(
                    "n {:016x} {} {} {:x} {} {}\n",
                    node.key.hash,
                    node.key.instance,
                    node.module,
                    node.tag,
                    node.version,
                    node.kind.as_str()
                )
                .as_bytes(),
            );
        }
        for edge in &self.edges {
            hasher.update(
                format!(
                    "e {} {} {} {}\n",
                    edge.from.0,
                    edge.to.0,
                    edge.kind.as_str(),
                    edge.ordinal
                )
                .as_bytes(),
            );
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Serialized form of a [`Graph`]: node attributes plus edges, in id order.
///
/// Instance ids are not stored; re-inserting nodes in order reproduces them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
}

impl From<Graph> for GraphData {
    fn from(graph: Graph) -> Self {
        Self { nodes: graph.nodes.iter().map(Node::spec).collect(), edges: graph.edges }
    }
}

impl TryFrom<GraphData> for Graph {
    type Error = GraphError;

    fn try_from(data: GraphData) -> Result<Self, Self::Error> {
        let mut graph = Graph::new();
        for spec in data.nodes {
            graph.add_node(spec);
        }
        for edge in data.edges {
            graph.add_edge(edge.from, edge.to, edge.kind, edge.ordinal)?;
        }
        Ok(graph)
    }
}

/// Graph recorded for one module during one process run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub module: String,
    pub graph: Graph,
}

impl ExecutionGraph {
    pub fn new(module: impl Into<String>) -> Self {
        Self { module: module.into(), graph: Graph::new() }
    }
}

/// Accumulated baseline for one distribution.
///
/// Grows monotonically: successful merges add nodes, edges and modules and
/// never remove them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedClusterGraph {
    pub distribution: String,
    /// Modules that have contributed at least one execution.
    pub modules: BTreeSet<String>,
    pub graph: Graph,
}

impl MergedClusterGraph {
    pub fn new(distribution: impl Into<String>) -> Self {
        Self { distribution: distribution.into(), modules: BTreeSet::new(), graph: Graph::new() }
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    /// Digest over the module set and the graph.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.distribution.as_bytes());
        for module in &self.modules {
            hasher.update(b"\0");
            hasher.update(module.as_bytes());
        }
        hasher.update(self.graph.digest().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
