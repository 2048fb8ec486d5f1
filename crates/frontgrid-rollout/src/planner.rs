//! Rollout planner: expands a strategy into the ordered list of traffic
//! splits the executor walks through.
//!
//! `states[0]` is always the allocation in force when the plan was made;
//! cancelling restores it. Every later state gives the target a strictly
//! larger share until the last one, where the target holds 100% and is
//! the default.

use frontgrid_state::{AllocationState, TrafficAllocation};
use tracing::debug;

use crate::error::InvalidState;
use crate::strategy::{RolloutStrategy, StrategyError};

/// Compute the allocation states for shifting `current` onto `target_version`.
pub fn plan(
    current: &AllocationState,
    target_version: &str,
    strategy: &RolloutStrategy,
) -> Result<Vec<AllocationState>, InvalidState> {
    strategy.validate()?;

    let stable = current
        .active_versions
        .iter()
        .find(|a| a.traffic == 100)
        .map(|a| a.version.clone())
        .ok_or(InvalidState::NoStableVersion)?;
    if stable == target_version {
        return Err(InvalidState::TargetAlreadyActive(stable));
    }

    let mut states = vec![current.clone()];
    let mut remaining: u32 = 100;
    let mut step = 0;

    while remaining > 0 {
        // Validation guarantees a step list reaches 100 before running out.
        let increment = strategy
            .increment_at(step)
            .ok_or(StrategyError::StepsShortOfFull(100 - remaining))?;
        remaining = remaining.saturating_sub(increment);

        let mut active_versions = vec![TrafficAllocation::new(target_version, 100 - remaining)];
        let default = if remaining > 0 {
            active_versions.push(TrafficAllocation::new(&stable, remaining));
            stable.clone()
        } else {
            target_version.to_string()
        };

        states.push(AllocationState {
            active_versions,
            default: Some(default),
        });
        step += 1;
    }

    debug!(
        from = %stable,
        to = %target_version,
        %strategy,
        states = states.len(),
        "planned rollout"
    );

    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stable(version: &str) -> AllocationState {
        AllocationState {
            active_versions: vec![TrafficAllocation::new(version, 100)],
            default: Some(version.to_string()),
        }
    }

    #[test]
    fn linear_5_percent_yields_21_states() {
        let current = stable("1.0.0");
        let states = plan(&current, "2.0.0", &RolloutStrategy::linear(5, 1)).unwrap();
        assert_eq!(states.len(), 21);
        assert_eq!(states[0], current);
        assert_eq!(states[1].share_of("2.0.0"), 5);
        assert_eq!(states[1].share_of("1.0.0"), 95);
        assert_eq!(states[1].default.as_deref(), Some("1.0.0"));

        let last = states.last().unwrap();
        assert_eq!(last.active_versions, vec![TrafficAllocation::new("2.0.0", 100)]);
        assert_eq!(last.default.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn all_at_once_yields_two_states() {
        let states = plan(&stable("1.0.0"), "2.0.0", &RolloutStrategy::all_at_once()).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].share_of("2.0.0"), 100);
        assert_eq!(states[1].active_versions.len(), 1);
    }

    #[test]
    fn canary_steps_yield_three_states() {
        let strategy = RolloutStrategy::stepped(vec![10, 90], 30);
        let states = plan(&stable("1.0.0"), "2.0.0", &strategy).unwrap();
        assert_eq!(states.len(), 3);
        assert_eq!(states[1].share_of("2.0.0"), 10);
        assert_eq!(states[1].share_of("1.0.0"), 90);
        assert_eq!(states[2].share_of("2.0.0"), 100);
    }

    #[test]
    fn uneven_increment_is_clamped_at_full() {
        let states = plan(&stable("1.0.0"), "2.0.0", &RolloutStrategy::linear(30, 1)).unwrap();
        let shares: Vec<u32> = states[1..].iter().map(|s| s.share_of("2.0.0")).collect();
        assert_eq!(shares, vec![30, 60, 90, 100]);
    }

    #[test]
    fn overshooting_step_list_is_clamped() {
        let strategy = RolloutStrategy::stepped(vec![60, 60, 60], 1);
        let states = plan(&stable("1.0.0"), "2.0.0", &strategy).unwrap();
        assert_eq!(states.len(), 3);
        assert_eq!(states[2].share_of("2.0.0"), 100);
    }

    #[test]
    fn target_share_strictly_increases_and_sums_to_100() {
        let states = plan(&stable("1.0.0"), "2.0.0", &RolloutStrategy::linear(7, 1)).unwrap();
        let mut previous = 0;
        for state in &states[1..] {
            let total: u32 = state.active_versions.iter().map(|a| a.traffic).sum();
            assert_eq!(total, 100);
            let share = state.share_of("2.0.0");
            assert!(share > previous);
            previous = share;
        }
        assert_eq!(previous, 100);
    }

    #[test]
    fn requires_a_stable_version() {
        let split = AllocationState {
            active_versions: vec![
                TrafficAllocation::new("1.0.0", 50),
                TrafficAllocation::new("1.1.0", 50),
            ],
            default: Some("1.0.0".to_string()),
        };
        assert_eq!(
            plan(&split, "2.0.0", &RolloutStrategy::all_at_once()),
            Err(InvalidState::NoStableVersion)
        );
        assert_eq!(
            plan(&AllocationState::default(), "2.0.0", &RolloutStrategy::all_at_once()),
            Err(InvalidState::NoStableVersion)
        );
    }

    #[test]
    fn rejects_target_equal_to_stable() {
        assert_eq!(
            plan(&stable("1.0.0"), "1.0.0", &RolloutStrategy::all_at_once()),
            Err(InvalidState::TargetAlreadyActive("1.0.0".to_string()))
        );
    }

    #[test]
    fn rejects_invalid_strategy() {
        assert_eq!(
            plan(&stable("1.0.0"), "2.0.0", &RolloutStrategy::linear(0, 1)),
            Err(InvalidState::Strategy(StrategyError::IncrementOutOfRange(0)))
        );
    }
}
