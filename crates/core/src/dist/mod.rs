//! Software units and autonomous distributions.
//!
//! A distribution is a named set of modules merged and reported as one trust
//! boundary. Distributions are configured by `<name>.asd` files holding one
//! module identifier per line, loaded once into a [`DistributionRegistry`]
//! that callers pass around explicitly.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the implicit distribution holding every module no config file claims.
pub const MAIN_PROGRAM: &str = "<main-program>";

/// File extension of distribution config files.
pub const DISTRIBUTION_EXTENSION: &str = "asd";

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("Failed to read distribution config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Distribution config {path} has no usable file name")]
    InvalidName { path: PathBuf },

    #[error("Distribution '{name}' is defined more than once (second definition at {path})")]
    Duplicate { name: String, path: PathBuf },
}

pub type DistributionResult<T> = Result<T, DistributionError>;

/// One executable or library, identified by its lowercased file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SoftwareUnit {
    pub name: String,
}

impl SoftwareUnit {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self { name: name.as_ref().trim().to_lowercase() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub name: String,
    pub units: BTreeSet<SoftwareUnit>,
}

impl Distribution {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), units: BTreeSet::new() }
    }

    pub fn with_units<I, S>(name: impl Into<String>, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { name: name.into(), units: units.into_iter().map(SoftwareUnit::new).collect() }
    }

    pub fn contains(&self, unit: &SoftwareUnit) -> bool {
        self.units.contains(unit)
    }
}

/// Load one distribution from a config file.
///
/// The file stem is the distribution name. Each non-blank line names one
/// module; names are compared case-insensitively.
pub fn load_distribution(path: &Path) -> DistributionResult<Distribution> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| DistributionError::InvalidName { path: path.to_path_buf() })?;
    let contents = fs::read_to_string(path)
        .map_err(|source| DistributionError::Io { path: path.to_path_buf(), source })?;
    let units = contents.lines().map(str::trim).filter(|line| !line.is_empty());
    Ok(Distribution::with_units(name, units))
}

/// Strip a trailing version from a module identifier such as `libc.so-2` or
/// `libssl.so-1.1`. Hyphens that are part of the name (`my-app`) stay.
fn unversioned_name(name: &str) -> &str {
    let Some((bare, suffix)) = name.rsplit_once('-') else {
        return name;
    };
    let version_like = suffix.starts_with(|c: char| c.is_ascii_digit())
        && suffix.chars().all(|c| c.is_ascii_digit() || c == '.');
    if version_like && !bare.is_empty() {
        bare
    } else {
        name
    }
}

/// Every configured distribution, keyed by name.
///
/// Always contains [`MAIN_PROGRAM`], which claims modules no config names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRegistry {
    distributions: BTreeMap<String, Distribution>,
}

impl Default for DistributionRegistry {
    fn default() -> Self {
        let mut distributions = BTreeMap::new();
        distributions.insert(MAIN_PROGRAM.to_string(), Distribution::new(MAIN_PROGRAM));
        Self { distributions }
    }
}

impl DistributionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.asd` file in `dir`. A missing directory yields only the main program.
    pub fn load_dir(dir: &Path) -> DistributionResult<Self> {
        let mut registry = Self::new();
        if !dir.exists() {
            log::info!("No distribution config directory at {}", dir.display());
            return Ok(registry);
        }

        let entries = fs::read_dir(dir)
            .map_err(|source| DistributionError::Io { path: dir.to_path_buf(), source })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| DistributionError::Io { path: dir.to_path_buf(), source })?;
            let path = entry.path();
            let is_config = path.extension().and_then(|ext| ext.to_str())
                == Some(DISTRIBUTION_EXTENSION);
            if path.is_file() && is_config {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let dist = load_distribution(&path)?;
            log::debug!("Loaded distribution '{}' with {} units", dist.name, dist.units.len());
            registry.insert(dist).map_err(|name| DistributionError::Duplicate { name, path })?;
        }
        Ok(registry)
    }

    /// Register a distribution. Returns the name back if it is already taken.
    pub fn insert(&mut self, dist: Distribution) -> Result<(), String> {
        if self.distributions.contains_key(&dist.name) {
            return Err(dist.name);
        }
        self.distributions.insert(dist.name.clone(), dist);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Distribution> {
        self.distributions.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.distributions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values()
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }

    /// The configured distribution that names `module`, if any.
    ///
    /// Matches the full identifier first, then the identifier with any
    /// trailing `-<version>` removed.
    pub fn claimed_by(&self, module: &str) -> Option<&Distribution> {
        let unit = SoftwareUnit::new(module);
        let bare = SoftwareUnit::new(unversioned_name(&unit.name));
        self.distributions
            .values()
            .filter(|dist| dist.name != MAIN_PROGRAM)
            .find(|dist| dist.contains(&unit) || dist.contains(&bare))
    }

    /// Name of the distribution `module` belongs to, falling back to the main program.
    pub fn distribution_for(&self, module: &str) -> &str {
        self.claimed_by(module).map_or(MAIN_PROGRAM, |dist| dist.name.as_str())
    }
}
