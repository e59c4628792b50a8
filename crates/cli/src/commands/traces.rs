use std::path::Path;

use anyhow::{Context, Result};
use cfi_merge_core::trace::{load_execution_graphs, StreamType, TraceDirectory};
use serde::Serialize;

use crate::canonicalize_or_current;

#[derive(Serialize)]
pub struct StreamInfo {
    pub stream: String,
    pub file: String,
    pub bytes: u64,
    /// Whole records in the stream; absent for the text module stream.
    pub records: Option<u64>,
}

#[derive(Serialize)]
pub struct ModuleGraphInfo {
    pub module: String,
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Serialize)]
pub struct TraceInfo {
    pub dir: String,
    pub process_name: String,
    pub process_id: u32,
    pub streams: Vec<StreamInfo>,
    pub modules: Vec<ModuleGraphInfo>,
}

/// Summarize one trace directory: its streams and the module graphs they hold.
pub fn trace_info_command(trace: &str, json: bool) -> Result<()> {
    let dir = canonicalize_or_current(trace)?;
    let info = collect_trace_info(&dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Trace: {}-{}", info.process_name, info.process_id);
    println!("Directory: {}", info.dir);
    println!("Streams:");
    for stream in &info.streams {
        match stream.records {
            Some(records) => println!(
                "  - {}: {} ({} bytes, {} records)",
                stream.stream, stream.file, stream.bytes, records
            ),
            None => println!("  - {}: {} ({} bytes)", stream.stream, stream.file, stream.bytes),
        }
    }
    println!("Module graphs:");
    for module in &info.modules {
        println!("  - {}: {} nodes, {} edges", module.module, module.nodes, module.edges);
    }
    Ok(())
}

pub fn collect_trace_info(dir: &Path) -> Result<TraceInfo> {
    let trace = TraceDirectory::open(dir)
        .with_context(|| format!("Failed to open trace directory {}", dir.display()))?;

    let mut streams = Vec::new();
    for stream in StreamType::ALL {
        let bytes = trace.stream_len(stream)?;
        let file = trace
            .path(stream)
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let records = stream.record_words().map(|words| bytes / (8 * words as u64));
        streams.push(StreamInfo { stream: stream.tag().to_string(), file, bytes, records });
    }

    let modules = load_execution_graphs(&trace)?
        .into_iter()
        .map(|execution| ModuleGraphInfo {
            nodes: execution.graph.node_count(),
            edges: execution.graph.edge_count(),
            module: execution.module,
        })
        .collect();

    Ok(TraceInfo {
        dir: trace.dir().display().to_string(),
        process_name: trace.process_name().to_string(),
        process_id: trace.process_id(),
        streams,
        modules,
    })
}
