#![deny(warnings)]

//! Persistence layer: JSON and bincode snapshots of simulation results.
//!
//! Snapshots carry a content fingerprint of the result so a reloaded run can
//! be compared with a fresh one without diffing every series.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sim_runtime::SimulationResult;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::path::Path;
use tracing::{debug, info};

/// Version of the snapshot envelope.
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk encoding, chosen from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Bincode,
}

impl Format {
    /// `.json` is JSON; `.bin` and `.snapshot` are bincode.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("bin") | Some("snapshot") => Ok(Format::Bincode),
            other => bail!("unsupported snapshot extension {:?} for {}", other, path.display()),
        }
    }
}

/// Envelope written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub fingerprint: u64,
    pub result: SimulationResult,
}

impl Snapshot {
    pub fn new(result: SimulationResult) -> Result<Self> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            fingerprint: fingerprint(&result)?,
            result,
        })
    }
}

/// Content fingerprint of a result: a hash of its canonical JSON encoding.
pub fn fingerprint(result: &SimulationResult) -> Result<u64> {
    let bytes = serde_json::to_vec(result).context("encode result for fingerprint")?;
    let mut h = DefaultHasher::new();
    h.write(&bytes);
    Ok(h.finish())
}

pub fn encode(snapshot: &Snapshot, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec_pretty(snapshot).context("encode snapshot as json"),
        Format::Bincode => bincode::serialize(snapshot).context("encode snapshot as bincode"),
    }
}

/// Decode a snapshot and check its version and fingerprint.
pub fn decode(bytes: &[u8], format: Format) -> Result<Snapshot> {
    let snapshot: Snapshot = match format {
        Format::Json => serde_json::from_slice(bytes).context("decode json snapshot")?,
        Format::Bincode => bincode::deserialize(bytes).context("decode bincode snapshot")?,
    };
    if snapshot.version != SNAPSHOT_VERSION {
        bail!(
            "snapshot version {} not supported (expected {})",
            snapshot.version,
            SNAPSHOT_VERSION
        );
    }
    let actual = fingerprint(&snapshot.result)?;
    if actual != snapshot.fingerprint {
        bail!(
            "snapshot fingerprint mismatch: stored {:016x}, computed {:016x}",
            snapshot.fingerprint,
            actual
        );
    }
    Ok(snapshot)
}

/// Write a result to `path`, creating parent directories.
pub fn save(path: &Path, result: &SimulationResult) -> Result<u64> {
    let format = Format::from_path(path)?;
    let snapshot = Snapshot::new(result.clone())?;
    let bytes = encode(&snapshot, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    std::fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))?;
    info!(
        path = %path.display(),
        bytes = bytes.len(),
        fingerprint = snapshot.fingerprint,
        "snapshot saved"
    );
    Ok(snapshot.fingerprint)
}

/// Read a result saved with [`save`].
pub fn load(path: &Path) -> Result<SimulationResult> {
    let format = Format::from_path(path)?;
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "snapshot read");
    Ok(decode(&bytes, format)?.result)
}
