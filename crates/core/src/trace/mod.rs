//! Recorded trace directories.
//!
//! One process run leaves one file per [`StreamType`] in a directory, named
//! `<process>.<stream-tag>.<run>-<pid>.<ext>`. [`TraceDirectory`] locates the
//! files, [`HashStream`] reads their fixed-width records, and
//! [`load_execution_graphs`] assembles them into one graph per module.

pub mod loader;
pub mod stream;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::graph::GraphError;

pub use loader::{load_execution_graphs, load_graph_json, ModuleSpan};
pub use stream::HashStream;

/// The kinds of data file a trace run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamType {
    BlockHash,
    PairHash,
    ModuleGraph,
    CrossModuleGraph,
    GraphHash,
    Module,
}

impl StreamType {
    pub const ALL: [StreamType; 6] = [
        StreamType::BlockHash,
        StreamType::PairHash,
        StreamType::ModuleGraph,
        StreamType::CrossModuleGraph,
        StreamType::GraphHash,
        StreamType::Module,
    ];

    /// Tag embedded in the file name, between dots.
    pub fn tag(&self) -> &'static str {
        match self {
            StreamType::BlockHash => "block-hash",
            StreamType::PairHash => "pair-hash",
            StreamType::ModuleGraph => "module-graph",
            StreamType::CrossModuleGraph => "cross-module-graph",
            StreamType::GraphHash => "graph-hash",
            StreamType::Module => "module",
        }
    }

    /// 64-bit words per record. The module stream is text and has none.
    pub fn record_words(&self) -> Option<usize> {
        match self {
            StreamType::BlockHash | StreamType::PairHash => Some(1),
            StreamType::ModuleGraph | StreamType::GraphHash => Some(2),
            StreamType::CrossModuleGraph => Some(3),
            StreamType::Module => None,
        }
    }

    pub fn matches_file_name(&self, file_name: &str) -> bool {
        file_name.contains(&format!(".{}.", self.tag()))
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn list_streams(streams: &[StreamType]) -> String {
    streams.iter().map(StreamType::tag).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("Trace directory {dir} is missing required streams: {}", list_streams(.missing))]
    MissingStreams { dir: PathBuf, missing: Vec<StreamType> },

    #[error("Trace directory {dir} contains multiple {stream} files: {first} and {second}")]
    DuplicateStream { dir: PathBuf, stream: StreamType, first: String, second: String },

    #[error("Trace directory {dir} has a {stream} file with no process id: {file}")]
    MalformedRunSignature { dir: PathBuf, stream: StreamType, file: String },

    #[error("Failed to read {stream} stream in {dir}: {source}")]
    Io {
        dir: PathBuf,
        stream: StreamType,
        #[source]
        source: std::io::Error,
    },

    #[error("Truncated {stream} record in {dir}: {trailing} stray bytes at offset {offset}")]
    TruncatedRecord { dir: PathBuf, stream: StreamType, offset: u64, trailing: usize },

    #[error("Unknown {what} code {code} in {stream} stream of {dir}")]
    UnknownCode { dir: PathBuf, stream: StreamType, what: &'static str, code: u8 },

    #[error("Malformed {stream} entry in {dir} at line {line}: {content}")]
    MalformedLine { dir: PathBuf, stream: StreamType, line: usize, content: String },

    #[error("Edge in {stream} stream of {dir} references unknown block 0x{address:x} (version {version})")]
    UnknownBlock { dir: PathBuf, stream: StreamType, address: u64, version: u8 },

    #[error("Edge in {stream} stream of {dir} crosses from module {from} to {to}")]
    CrossModuleEdge { dir: PathBuf, stream: StreamType, from: String, to: String },

    #[error("Invalid graph in {stream} stream of {dir}: {source}")]
    Graph {
        dir: PathBuf,
        stream: StreamType,
        #[source]
        source: GraphError,
    },

    #[error("Failed to read graph file {path}: {source}")]
    GraphFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Graph file {path} is not a valid execution graph: {source}")]
    InvalidGraphFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type DataSourceResult<T> = Result<T, DataSourceError>;

/// Stream files of one recorded process run.
#[derive(Debug, Clone)]
pub struct TraceDirectory {
    dir: PathBuf,
    process_name: String,
    process_id: u32,
    streams: BTreeMap<StreamType, PathBuf>,
}

impl TraceDirectory {
    /// Locate exactly one file per stream type in `dir`.
    pub fn open(dir: &Path) -> DataSourceResult<Self> {
        let io_error = |source| DataSourceError::Io {
            dir: dir.to_path_buf(),
            stream: StreamType::BlockHash,
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut streams: BTreeMap<StreamType, PathBuf> = BTreeMap::new();
        for name in &names {
            for stream in StreamType::ALL {
                if !stream.matches_file_name(name) {
                    continue;
                }
                if let Some(first) = streams.get(&stream) {
                    return Err(DataSourceError::DuplicateStream {
                        dir: dir.to_path_buf(),
                        stream,
                        first: file_name(first),
                        second: name.clone(),
                    });
                }
                streams.insert(stream, dir.join(name));
            }
        }

        let missing: Vec<StreamType> =
            StreamType::ALL.into_iter().filter(|stream| !streams.contains_key(stream)).collect();
        if !missing.is_empty() {
            return Err(DataSourceError::MissingStreams { dir: dir.to_path_buf(), missing });
        }

        let signature = streams.get(&StreamType::BlockHash).map(|path| file_name(path)).unwrap_or_default();
        let (process_name, process_id) = parse_run_signature(&signature).ok_or_else(|| {
            DataSourceError::MalformedRunSignature {
                dir: dir.to_path_buf(),
                stream: StreamType::BlockHash,
                file: signature.clone(),
            }
        })?;

        log::debug!("Opened trace directory {} for {process_name}-{process_id}", dir.display());
        Ok(Self { dir: dir.to_path_buf(), process_name, process_id, streams })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn path(&self, stream: StreamType) -> Option<&Path> {
        self.streams.get(&stream).map(PathBuf::as_path)
    }

    /// Open a binary stream for reading.
    pub fn hash_stream(&self, stream: StreamType) -> DataSourceResult<HashStream<fs::File>> {
        let file = self.open_file(stream)?;
        Ok(HashStream::new(file, &self.dir, stream))
    }

    /// Read a text stream in full.
    pub fn read_text(&self, stream: StreamType) -> DataSourceResult<String> {
        let path = self.require(stream)?;
        fs::read_to_string(path).map_err(|source| self.io_error(stream, source))
    }

    /// Size of a stream file in bytes.
    pub fn stream_len(&self, stream: StreamType) -> DataSourceResult<u64> {
        let path = self.require(stream)?;
        fs::metadata(path).map(|meta| meta.len()).map_err(|source| self.io_error(stream, source))
    }

    fn open_file(&self, stream: StreamType) -> DataSourceResult<fs::File> {
        let path = self.require(stream)?;
        fs::File::open(path).map_err(|source| self.io_error(stream, source))
    }

    fn require(&self, stream: StreamType) -> DataSourceResult<&Path> {
        self.path(stream).ok_or_else(|| DataSourceError::MissingStreams {
            dir: self.dir.clone(),
            missing: vec![stream],
        })
    }

    fn io_error(&self, stream: StreamType, source: std::io::Error) -> DataSourceError {
        DataSourceError::Io { dir: self.dir.clone(), stream, source }
    }
}

impl fmt::Display for TraceDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.process_name, self.process_id)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().and_then(|name| name.to_str()).unwrap_or_default().to_string()
}

/// Split `<process>.block-hash.<run>-<pid>.<ext>` into process name and pid.
fn parse_run_signature(file_name: &str) -> Option<(String, u32)> {
    let marker = format!(".{}", StreamType::BlockHash.tag());
    let tag_start = file_name.find(&marker)?;
    let process_name = &file_name[..tag_start];
    let run = &file_name[tag_start + marker.len()..];
    let dash = run.rfind('-')?;
    let dot = run.rfind('.')?;
    if process_name.is_empty() || dot <= dash {
        return None;
    }
    let pid = run[dash + 1..dot].parse().ok()?;
    Some((process_name.to_string(), pid))
}

