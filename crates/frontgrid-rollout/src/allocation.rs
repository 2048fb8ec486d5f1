//! Validation of operator-supplied traffic allocations.

use frontgrid_state::{AllocationState, TrafficAllocation};

use crate::error::InvalidState;

/// Merge a partial allocation update onto `current` and validate the result.
///
/// When `active_versions` is given its shares must total exactly 100;
/// zero-share entries are then dropped. The resulting default, whether
/// supplied or carried over, must name one of the active versions.
pub fn validate_allocation(
    current: &AllocationState,
    active_versions: Option<Vec<TrafficAllocation>>,
    default: Option<String>,
) -> Result<AllocationState, InvalidState> {
    let mut next = current.clone();

    if let Some(active) = active_versions {
        if let Some(bad) = active.iter().find(|a| a.traffic > 100) {
            return Err(InvalidState::TrafficShareOutOfRange {
                version: bad.version.clone(),
                traffic: bad.traffic,
            });
        }
        let total: u64 = active.iter().map(|a| u64::from(a.traffic)).sum();
        if total != 100 {
            return Err(InvalidState::TrafficSum(total));
        }
        next.active_versions = active.into_iter().filter(|a| a.traffic > 0).collect();
    }
    if default.is_some() {
        next.default = default;
    }

    if let Some(default) = &next.default {
        if !next.active_versions.iter().any(|a| &a.version == default) {
            return Err(InvalidState::DefaultNotActive(default.clone()));
        }
    }

    Ok(next)
}
