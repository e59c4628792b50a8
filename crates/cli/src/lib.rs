use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use cfi_merge_core::report::ProgramEventFrequencies;

pub mod commands;

/// Canonicalize the root path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        // The path may not exist yet (init-workspace), so fall back to joining it.
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Infer a workspace name from the root path.
///
/// If the root has no final component (e.g., `/`), fall back to `unnamed-workspace`.
pub fn infer_workspace_name(root: &Path) -> String {
    root.file_name().and_then(|os_str| os_str.to_str()).unwrap_or("unnamed-workspace").to_string()
}

/// Read event frequencies from a `.json`, `.yaml` or `.yml` file.
pub fn load_frequencies(path: &Path) -> Result<ProgramEventFrequencies> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read event frequencies at {}", path.display()))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse event frequencies JSON at {}", path.display())),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse event frequencies YAML at {}", path.display())),
        _ => Err(anyhow!(
            "Unsupported event frequency file {}; expected .json, .yaml or .yml",
            path.display()
        )),
    }
}

/// Write event frequencies, choosing JSON or YAML by extension.
pub fn save_frequencies(path: &Path, frequencies: &ProgramEventFrequencies) -> Result<()> {
    let text = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::to_string(frequencies).context("Failed to serialize event frequencies")?
        }
        _ => serde_json::to_string_pretty(frequencies)
            .context("Failed to serialize event frequencies")?,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, text)
        .with_context(|| format!("Failed to write event frequencies to {}", path.display()))
}
