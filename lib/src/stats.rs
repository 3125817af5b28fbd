//! Change statistics between versions.

use serde::Serialize;

use crate::controller::Controller;
use crate::errors::Result;
use crate::options::DiffStrategy;
use crate::patch::PatchId;
use crate::triple::StringTriple;

/// Additions and deletions between two versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeltaSize {
    pub additions: u64,
    pub deletions: u64,
}

impl DeltaSize {
    pub fn total(&self) -> u64 {
        self.additions + self.deletions
    }
}

pub fn delta_size(controller: &Controller, i: PatchId, j: PatchId) -> Result<DeltaSize> {
    let mut size = DeltaSize::default();
    let (from, to) = (i.min(j), i.max(j));
    for delta in
        controller.get_delta_materialized(&StringTriple::any(), 0, from, to, DiffStrategy::Auto)?
    {
        if delta.is_addition {
            size.additions += 1;
        } else {
            size.deletions += 1;
        }
    }
    Ok(size)
}

fn version_len(controller: &Controller, p: PatchId) -> Result<u64> {
    Ok(controller
        .get_version_materialized_count(&StringTriple::any(), p)?
        .0)
}

/// Share of the triples of either version that changed between `i` and
/// `j`: `|delta| / |V_i ∪ V_j|`. Zero when both versions are empty.
pub fn change_ratio(controller: &Controller, i: PatchId, j: PatchId) -> Result<f64> {
    let size = delta_size(controller, i, j)?;
    let union = version_len(controller, i.min(j))? + size.additions;
    if union == 0 {
        return Ok(0.0);
    }
    Ok(size.total() as f64 / union as f64)
}

/// `|V_j| / |V_i|`; infinite when version `i` is empty and `j` is not.
pub fn growth_ratio(controller: &Controller, i: PatchId, j: PatchId) -> Result<f64> {
    let from = version_len(controller, i)?;
    let to = version_len(controller, j)?;
    Ok(match (from, to) {
        (0, 0) => 1.0,
        (0, _) => f64::INFINITY,
        _ => to as f64 / from as f64,
    })
}

/// One row of the per-version statistics table.
#[derive(Debug, Clone, Serialize)]
pub struct VersionStats {
    pub version: PatchId,
    pub snapshot: PatchId,
    pub triples: u64,
    pub additions: u64,
    pub deletions: u64,
    pub change_ratio: f64,
    pub growth_ratio: f64,
}

/// Statistics of version `p` relative to version `p - 1`.
pub fn version_stats(controller: &Controller, p: PatchId) -> Result<VersionStats> {
    let snapshot = controller
        .snapshot_manager()
        .get_latest_snapshot(p)?
        .unwrap_or(0);
    let triples = version_len(controller, p)?;
    let previous = p.saturating_sub(1);
    let (size, change, growth) = if p == 0 {
        (DeltaSize::default(), 0.0, 1.0)
    } else {
        match delta_size(controller, previous, p) {
            Ok(size) => (
                size,
                change_ratio(controller, previous, p)?,
                growth_ratio(controller, previous, p)?,
            ),
            // no delta crosses a root snapshot
            Err(crate::errors::Error::Unsupported(_)) => (DeltaSize::default(), 0.0, 1.0),
            Err(e) => return Err(e),
        }
    };
    Ok(VersionStats {
        version: p,
        snapshot,
        triples,
        additions: size.additions,
        deletions: size.deletions,
        change_ratio: change,
        growth_ratio: growth,
    })
}
