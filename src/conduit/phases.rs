// The Conduit's finite state machine: its phases and the transition table
// that gates movement between them. Every transition a Conduit performs
// must land in `VALID_TRANSITIONS[from]` — this is checked once, centrally,
// rather than scattered across each phase handler.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Navigate,
    Assess,
    Obstruct,
    AiReason,
    ExecutePlan,
    Extract,
    Validate,
    Repair,
    Persist,
    Complete,
    Fail,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Navigate => "NAVIGATE",
            Phase::Assess => "ASSESS",
            Phase::Obstruct => "OBSTRUCT",
            Phase::AiReason => "AI_REASON",
            Phase::ExecutePlan => "EXECUTE_PLAN",
            Phase::Extract => "EXTRACT",
            Phase::Validate => "VALIDATE",
            Phase::Repair => "REPAIR",
            Phase::Persist => "PERSIST",
            Phase::Complete => "COMPLETE",
            Phase::Fail => "FAIL",
        }
    }
}

/// Every phase a Conduit run can transition to from each phase. `AiReason`
/// carries one extra edge to `Navigate` beyond what the original
/// implementation's table declared: its own handler re-enters `Navigate`
/// when the model returns an empty plan and retries remain, so that edge
/// belongs in the table rather than being an unchecked exception to it.
pub static VALID_TRANSITIONS: Lazy<HashMap<Phase, HashSet<Phase>>> = Lazy::new(|| {
    use Phase::*;
    let mut map = HashMap::new();
    map.insert(Init, HashSet::from([Navigate, Fail]));
    map.insert(Navigate, HashSet::from([Assess, Fail]));
    map.insert(Assess, HashSet::from([Extract, Obstruct, Fail]));
    map.insert(Obstruct, HashSet::from([AiReason, Navigate, Fail]));
    map.insert(AiReason, HashSet::from([ExecutePlan, Navigate, Fail]));
    map.insert(ExecutePlan, HashSet::from([Assess, Fail]));
    map.insert(Extract, HashSet::from([Validate, Fail]));
    map.insert(Validate, HashSet::from([Persist, Repair, Fail]));
    map.insert(Repair, HashSet::from([Validate, Fail]));
    map.insert(Persist, HashSet::from([Complete, Fail]));
    map.insert(Complete, HashSet::new());
    map.insert(Fail, HashSet::new());
    map
});

pub static TERMINAL_PHASES: Lazy<HashSet<Phase>> = Lazy::new(|| HashSet::from([Phase::Complete, Phase::Fail]));

pub fn is_valid_transition(from: Phase, to: Phase) -> bool {
    VALID_TRANSITIONS.get(&from).map(|allowed| allowed.contains(&to)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_have_no_outgoing_transitions() {
        assert!(VALID_TRANSITIONS[&Phase::Complete].is_empty());
        assert!(VALID_TRANSITIONS[&Phase::Fail].is_empty());
    }

    #[test]
    fn every_non_terminal_phase_can_reach_fail() {
        for (phase, targets) in VALID_TRANSITIONS.iter() {
            if !TERMINAL_PHASES.contains(phase) {
                assert!(targets.contains(&Phase::Fail), "{phase:?} cannot reach Fail");
            }
        }
    }

    #[test]
    fn is_valid_transition_matches_table() {
        assert!(is_valid_transition(Phase::Init, Phase::Navigate));
        assert!(!is_valid_transition(Phase::Init, Phase::Extract));
        assert!(is_valid_transition(Phase::AiReason, Phase::Navigate));
        assert!(is_valid_transition(Phase::AiReason, Phase::ExecutePlan));
    }

    #[test]
    fn phase_as_str_matches_wire_vocabulary() {
        assert_eq!(Phase::AiReason.as_str(), "AI_REASON");
        assert_eq!(Phase::ExecutePlan.as_str(), "EXECUTE_PLAN");
    }
}
