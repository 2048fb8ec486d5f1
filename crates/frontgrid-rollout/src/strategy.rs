//! Rollout strategies: linear, canary and all-at-once traffic shifts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Percentage of traffic moved to the target version per step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Increment {
    /// The same share every step.
    Fixed(u32),
    /// An explicit share per step, applied in order.
    Steps(Vec<u32>),
}

/// How to shift traffic from the stable version to a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    pub increment: Increment,
    /// Minutes to wait before applying each step after the first state.
    pub wait_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("increment must be between 1 and 100, got {0}")]
    IncrementOutOfRange(u32),

    #[error("step list is empty")]
    EmptySteps,

    #[error("steps add up to {0}%, which never reaches 100%")]
    StepsShortOfFull(u32),

    #[error("unknown deployment strategy {0:?}")]
    UnknownPreset(String),
}

impl RolloutStrategy {
    pub fn linear(increment: u32, wait_minutes: u64) -> Self {
        Self {
            increment: Increment::Fixed(increment),
            wait_minutes,
        }
    }

    pub fn stepped(steps: Vec<u32>, wait_minutes: u64) -> Self {
        Self {
            increment: Increment::Steps(steps),
            wait_minutes,
        }
    }

    pub fn all_at_once() -> Self {
        Self::linear(100, 0)
    }

    /// Seconds the executor sleeps before each step.
    pub fn step_wait_secs(&self) -> u64 {
        self.wait_minutes.saturating_mul(60)
    }

    /// Share moved at step `step` (0-based), or `None` once an explicit
    /// step list is exhausted.
    pub fn increment_at(&self, step: usize) -> Option<u32> {
        match &self.increment {
            Increment::Fixed(n) => Some(*n),
            Increment::Steps(steps) => steps.get(step).copied(),
        }
    }

    /// Reject strategies that could never bring the target to 100%.
    pub fn validate(&self) -> Result<(), StrategyError> {
        match &self.increment {
            Increment::Fixed(n) => check_share(*n),
            Increment::Steps(steps) => {
                if steps.is_empty() {
                    return Err(StrategyError::EmptySteps);
                }
                for n in steps {
                    check_share(*n)?;
                }
                let total: u32 = steps.iter().sum();
                if total < 100 {
                    return Err(StrategyError::StepsShortOfFull(total));
                }
                Ok(())
            }
        }
    }
}

fn check_share(n: u32) -> Result<(), StrategyError> {
    if (1..=100).contains(&n) {
        Ok(())
    } else {
        Err(StrategyError::IncrementOutOfRange(n))
    }
}

impl fmt::Display for RolloutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.increment {
            Increment::Fixed(n) => write!(f, "linear {n}% every {}m", self.wait_minutes),
            Increment::Steps(steps) => write!(f, "steps {steps:?} every {}m", self.wait_minutes),
        }
    }
}

/// Strategy presets accepted by the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedStrategy {
    Linear10PercentEvery10Minutes,
    Linear10PercentEvery1Minute,
    Linear10PercentEvery2Minutes,
    Linear10PercentEvery3Minutes,
    Canary10Percent30Minutes,
    Canary10Percent5Minutes,
    Canary10Percent10Minutes,
    Canary10Percent15Minutes,
    AllAtOnce,
}

impl NamedStrategy {
    pub const ALL: [NamedStrategy; 9] = [
        NamedStrategy::Linear10PercentEvery10Minutes,
        NamedStrategy::Linear10PercentEvery1Minute,
        NamedStrategy::Linear10PercentEvery2Minutes,
        NamedStrategy::Linear10PercentEvery3Minutes,
        NamedStrategy::Canary10Percent30Minutes,
        NamedStrategy::Canary10Percent5Minutes,
        NamedStrategy::Canary10Percent10Minutes,
        NamedStrategy::Canary10Percent15Minutes,
        NamedStrategy::AllAtOnce,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NamedStrategy::Linear10PercentEvery10Minutes => "Linear10PercentEvery10Minutes",
            NamedStrategy::Linear10PercentEvery1Minute => "Linear10PercentEvery1Minute",
            NamedStrategy::Linear10PercentEvery2Minutes => "Linear10PercentEvery2Minutes",
            NamedStrategy::Linear10PercentEvery3Minutes => "Linear10PercentEvery3Minutes",
            NamedStrategy::Canary10Percent30Minutes => "Canary10Percent30Minutes",
            NamedStrategy::Canary10Percent5Minutes => "Canary10Percent5Minutes",
            NamedStrategy::Canary10Percent10Minutes => "Canary10Percent10Minutes",
            NamedStrategy::Canary10Percent15Minutes => "Canary10Percent15Minutes",
            NamedStrategy::AllAtOnce => "AllAtOnce",
        }
    }

    pub fn strategy(self) -> RolloutStrategy {
        match self {
            NamedStrategy::Linear10PercentEvery10Minutes => RolloutStrategy::linear(10, 10),
            NamedStrategy::Linear10PercentEvery1Minute => RolloutStrategy::linear(10, 1),
            NamedStrategy::Linear10PercentEvery2Minutes => RolloutStrategy::linear(10, 2),
            NamedStrategy::Linear10PercentEvery3Minutes => RolloutStrategy::linear(10, 3),
            NamedStrategy::Canary10Percent30Minutes => RolloutStrategy::stepped(vec![10, 90], 30),
            NamedStrategy::Canary10Percent5Minutes => RolloutStrategy::stepped(vec![10, 90], 5),
            NamedStrategy::Canary10Percent10Minutes => RolloutStrategy::stepped(vec![10, 90], 10),
            NamedStrategy::Canary10Percent15Minutes => RolloutStrategy::stepped(vec![10, 90], 15),
            NamedStrategy::AllAtOnce => RolloutStrategy::all_at_once(),
        }
    }
}

impl fmt::Display for NamedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamedStrategy {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NamedStrategy::ALL
            .into_iter()
            .find(|preset| preset.as_str() == s)
            .ok_or_else(|| StrategyError::UnknownPreset(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for preset in NamedStrategy::ALL {
            preset.strategy().validate().unwrap();
        }
    }

    #[test]
    fn preset_names_parse() {
        for preset in NamedStrategy::ALL {
            assert_eq!(preset.as_str().parse::<NamedStrategy>().unwrap(), preset);
        }
        assert!(matches!(
            "Linear50PercentEveryDay".parse::<NamedStrategy>(),
            Err(StrategyError::UnknownPreset(_))
        ));
    }

    #[test]
    fn preset_deserializes_from_json_name() {
        let preset: NamedStrategy = serde_json::from_str("\"Canary10Percent5Minutes\"").unwrap();
        let strategy = preset.strategy();
        assert_eq!(strategy.increment, Increment::Steps(vec![10, 90]));
        assert_eq!(strategy.step_wait_secs(), 300);
    }

    #[test]
    fn increment_at_follows_step_list() {
        let s = RolloutStrategy::stepped(vec![10, 90], 5);
        assert_eq!(s.increment_at(0), Some(10));
        assert_eq!(s.increment_at(1), Some(90));
        assert_eq!(s.increment_at(2), None);

        let linear = RolloutStrategy::linear(5, 1);
        assert_eq!(linear.increment_at(40), Some(5));
    }

    #[test]
    fn validate_rejects_bad_increments() {
        assert_eq!(
            RolloutStrategy::linear(0, 1).validate(),
            Err(StrategyError::IncrementOutOfRange(0))
        );
        assert_eq!(
            RolloutStrategy::linear(101, 1).validate(),
            Err(StrategyError::IncrementOutOfRange(101))
        );
        assert_eq!(
            RolloutStrategy::stepped(vec![], 1).validate(),
            Err(StrategyError::EmptySteps)
        );
        assert_eq!(
            RolloutStrategy::stepped(vec![10, 20], 1).validate(),
            Err(StrategyError::StepsShortOfFull(30))
        );
        assert_eq!(
            RolloutStrategy::stepped(vec![50, 0, 50], 1).validate(),
            Err(StrategyError::IncrementOutOfRange(0))
        );
    }

    #[test]
    fn serializes_roundtrip() {
        let strategy = RolloutStrategy::stepped(vec![25, 75], 3);
        let json = serde_json::to_string(&strategy).unwrap();
        assert!(json.contains("waitMinutes"));
        let back: RolloutStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
    }
}
