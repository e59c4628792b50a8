use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::graph::{EdgeType, ExecutionGraph, MetaNodeType, NodeId, NodeSpec, UNKNOWN_MODULE};
use crate::trace::{DataSourceError, DataSourceResult, StreamType, TraceDirectory};

const ADDRESS_MASK: u64 = 0x0000_ffff_ffff_ffff;

/// Address range a module was loaded at during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpan {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl ModuleSpan {
    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }
}

/// Node tag word: meta type in bits 63..56, tag version in 55..48, address below.
#[derive(Debug, Clone, Copy)]
struct TagWord {
    kind_code: u8,
    version: u8,
    address: u64,
}

impl TagWord {
    fn decode(word: u64) -> Self {
        Self {
            kind_code: (word >> 56) as u8,
            version: ((word >> 48) & 0xff) as u8,
            address: word & ADDRESS_MASK,
        }
    }
}

/// Edge word: edge type in the high nibble of the top byte, ordinal in its
/// low nibble, then the tag version and address as in [`TagWord`].
#[derive(Debug, Clone, Copy)]
struct EdgeWord {
    kind_code: u8,
    ordinal: u32,
    version: u8,
    address: u64,
}

impl EdgeWord {
    fn decode(word: u64) -> Self {
        let top = (word >> 56) as u8;
        Self {
            kind_code: top >> 4,
            ordinal: u32::from(top & 0x0f),
            version: ((word >> 48) & 0xff) as u8,
            address: word & ADDRESS_MASK,
        }
    }
}

/// Parse the text module stream: one `name start end` line per module, hex addresses.
pub fn parse_module_spans(trace: &TraceDirectory) -> DataSourceResult<Vec<ModuleSpan>> {
    let text = trace.read_text(StreamType::Module)?;
    let mut spans = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = || DataSourceError::MalformedLine {
            dir: trace.dir().to_path_buf(),
            stream: StreamType::Module,
            line: idx + 1,
            content: line.to_string(),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, start, end] = fields.as_slice() else {
            return Err(malformed());
        };
        let start = parse_hex(start).ok_or_else(malformed)?;
        let end = parse_hex(end).ok_or_else(malformed)?;
        if end <= start {
            return Err(malformed());
        }
        spans.push(ModuleSpan { name: name.to_string(), start, end });
    }
    Ok(spans)
}

fn parse_hex(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")).unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}

/// Per-module graphs under construction, plus the address index edges resolve against.
struct GraphBuilder<'t> {
    trace: &'t TraceDirectory,
    spans: Vec<ModuleSpan>,
    graphs: BTreeMap<String, ExecutionGraph>,
    blocks: HashMap<(u64, u8), (String, NodeId)>,
    exits: HashMap<(String, u64), NodeId>,
    entries: HashMap<(String, u64), NodeId>,
}

impl<'t> GraphBuilder<'t> {
    fn new(trace: &'t TraceDirectory, spans: Vec<ModuleSpan>) -> Self {
        Self {
            trace,
            spans,
            graphs: BTreeMap::new(),
            blocks: HashMap::new(),
            exits: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn graph_mut(&mut self, module: &str) -> &mut ExecutionGraph {
        self.graphs.entry(module.to_string()).or_insert_with(|| ExecutionGraph::new(module))
    }

    /// Owning module and module-relative tag of an absolute address.
    fn locate(&self, address: u64) -> (String, u64) {
        match self.spans.iter().find(|span| span.contains(address)) {
            Some(span) => (span.name.clone(), address - span.start),
            None => (UNKNOWN_MODULE.to_string(), address),
        }
    }

    fn load_nodes(&mut self) -> DataSourceResult<()> {
        let mut stream = self.trace.hash_stream(StreamType::GraphHash)?;
        while let Some([tag_word, hash]) = stream.next_record::<2>()? {
            let tag = TagWord::decode(tag_word);
            let kind = MetaNodeType::from_code(tag.kind_code).ok_or_else(|| DataSourceError::UnknownCode {
                dir: self.trace.dir().to_path_buf(),
                stream: StreamType::GraphHash,
                what: "node type",
                code: tag.kind_code,
            })?;
            if self.blocks.contains_key(&(tag.address, tag.version)) {
                log::debug!("Skipping repeated block 0x{:x} in {}", tag.address, self.trace);
                continue;
            }

            let (module, relative) = self.locate(tag.address);
            let spec = NodeSpec::new(hash, module.as_str(), kind)
                .with_tag(relative)
                .with_version(tag.version);
            let id = self.graph_mut(&module).graph.add_node(spec);
            self.blocks.insert((tag.address, tag.version), (module, id));
        }
        Ok(())
    }

    fn block(&self, stream: StreamType, word: EdgeWord) -> DataSourceResult<(String, NodeId)> {
        self.blocks.get(&(word.address, word.version)).cloned().ok_or_else(|| {
            DataSourceError::UnknownBlock {
                dir: self.trace.dir().to_path_buf(),
                stream,
                address: word.address,
                version: word.version,
            }
        })
    }

    fn edge_type(&self, stream: StreamType, code: u8) -> DataSourceResult<EdgeType> {
        EdgeType::from_code(code).ok_or_else(|| DataSourceError::UnknownCode {
            dir: self.trace.dir().to_path_buf(),
            stream,
            what: "edge type",
            code,
        })
    }

    fn connect(
        &mut self,
        stream: StreamType,
        module: &str,
        from: NodeId,
        to: NodeId,
        kind: EdgeType,
        ordinal: u32,
    ) -> DataSourceResult<()> {
        let dir = self.trace.dir().to_path_buf();
        self.graph_mut(module)
            .graph
            .add_edge(from, to, kind, ordinal)
            .map(|_| ())
            .map_err(|source| DataSourceError::Graph { dir, stream, source })
    }

    fn load_module_edges(&mut self) -> DataSourceResult<()> {
        let stream_type = StreamType::ModuleGraph;
        let mut stream = self.trace.hash_stream(stream_type)?;
        while let Some([from_word, to_word]) = stream.next_record::<2>()? {
            let from_word = EdgeWord::decode(from_word);
            let to_word = EdgeWord::decode(to_word);
            let kind = self.edge_type(stream_type, from_word.kind_code)?;
            let (from_module, from) = self.block(stream_type, from_word)?;
            let (to_module, to) = self.block(stream_type, to_word)?;
            if from_module != to_module {
                return Err(DataSourceError::CrossModuleEdge {
                    dir: self.trace.dir().to_path_buf(),
                    stream: stream_type,
                    from: from_module,
                    to: to_module,
                });
            }
            self.connect(stream_type, &from_module, from, to, kind, from_word.ordinal)?;
        }
        Ok(())
    }

    /// Split each cross-module edge into an exit node in the caller's graph and an
    /// entry node in the callee's, both keyed by the edge signature.
    fn load_cross_module_edges(&mut self) -> DataSourceResult<()> {
        let stream_type = StreamType::CrossModuleGraph;
        let mut stream = self.trace.hash_stream(stream_type)?;
        while let Some([from_word, to_word, signature]) = stream.next_record::<3>()? {
            let from_word = EdgeWord::decode(from_word);
            let to_word = EdgeWord::decode(to_word);
            let kind = self.edge_type(stream_type, from_word.kind_code)?;
            let (from_module, from) = self.block(stream_type, from_word)?;
            let (to_module, to) = self.block(stream_type, to_word)?;

            let exit = self.boundary_node(&from_module, signature, MetaNodeType::ModuleExit);
            let entry = self.boundary_node(&to_module, signature, MetaNodeType::ModuleEntry);

            let from_graph = &self.graph_mut(&from_module).graph;
            if from_graph.find_edge(from, exit).is_none() {
                self.connect(stream_type, &from_module, from, exit, kind, from_word.ordinal)?;
            }
            let to_graph = &self.graph_mut(&to_module).graph;
            if to_graph.find_edge(entry, to).is_none() {
                self.connect(stream_type, &to_module, entry, to, kind, from_word.ordinal)?;
            }
        }
        Ok(())
    }

    fn boundary_node(&mut self, module: &str, signature: u64, kind: MetaNodeType) -> NodeId {
        let index = match kind {
            MetaNodeType::ModuleExit => &self.exits,
            _ => &self.entries,
        };
        if let Some(id) = index.get(&(module.to_string(), signature)) {
            return *id;
        }
        let id = self.graph_mut(module).graph.add_node(NodeSpec::new(signature, module, kind));
        let index = match kind {
            MetaNodeType::ModuleExit => &mut self.exits,
            _ => &mut self.entries,
        };
        index.insert((module.to_string(), signature), id);
        id
    }
}

/// Build one execution graph per module from a trace directory.
///
/// Graphs come back ordered by module name.
pub fn load_execution_graphs(trace: &TraceDirectory) -> DataSourceResult<Vec<ExecutionGraph>> {
    let spans = parse_module_spans(trace)?;
    let mut builder = GraphBuilder::new(trace, spans);
    builder.load_nodes()?;
    builder.load_module_edges()?;
    builder.load_cross_module_edges()?;

    let graphs: Vec<ExecutionGraph> = builder.graphs.into_values().collect();
    log::info!("Loaded {} module graphs from {trace}", graphs.len());
    Ok(graphs)
}

/// Read an execution graph serialized as JSON.
pub fn load_graph_json(path: &Path) -> DataSourceResult<ExecutionGraph> {
    let text = fs::read_to_string(path)
        .map_err(|source| DataSourceError::GraphFile { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text)
        .map_err(|source| DataSourceError::InvalidGraphFile { path: path.to_path_buf(), source })
}
