//! Election of the designated intermediate system on broadcast circuits.
//!
//! The election is preemptive: whenever a better candidate shows up it takes over immediately.
//! There is no backup and no hysteresis.

use crate::system_id::SystemId;

/// Priority which excludes a router from being elected.
pub const NEVER_LEAD_PRIORITY: u8 = 0;

/// Default priority of a circuit.
pub const DEFAULT_PRIORITY: u8 = 64;

/// A router taking part in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub priority: u8,
    pub system_id: SystemId,
}

/// Elect the designated router among the candidates. The highest priority wins, ties are broken
/// by the highest system id. Returns `None` if no candidate is eligible.
pub fn elect(candidates: impl IntoIterator<Item = Candidate>) -> Option<SystemId> {
    candidates
        .into_iter()
        .filter(|c| c.priority != NEVER_LEAD_PRIORITY)
        .max_by_key(|c| (c.priority, c.system_id))
        .map(|c| c.system_id)
}

#[cfg(test)]
mod tests {
    use super::{elect, Candidate};
    use crate::system_id::SystemId;

    fn candidate(priority: u8, last: u8) -> Candidate {
        Candidate {
            priority,
            system_id: SystemId::new([0, 0, 0, 0, 0, last]),
        }
    }

    #[test]
    fn highest_priority_wins() {
        let winner = elect([candidate(10, 9), candidate(20, 1)]);
        assert_eq!(winner, Some(SystemId::new([0, 0, 0, 0, 0, 1])));
    }

    #[test]
    fn preempted_by_better_candidate() {
        let mut candidates = vec![candidate(10, 1), candidate(20, 2)];
        assert_eq!(elect(candidates.clone()), Some(SystemId::new([0, 0, 0, 0, 0, 2])));

        candidates.push(candidate(30, 3));
        assert_eq!(elect(candidates), Some(SystemId::new([0, 0, 0, 0, 0, 3])));
    }

    #[test]
    fn ties_broken_by_system_id() {
        let winner = elect([candidate(64, 4), candidate(64, 7), candidate(64, 5)]);
        assert_eq!(winner, Some(SystemId::new([0, 0, 0, 0, 0, 7])));
    }

    #[test]
    fn never_lead_is_excluded() {
        assert_eq!(elect([candidate(0, 9), candidate(0, 8)]), None);
        assert_eq!(
            elect([candidate(0, 9), candidate(1, 2)]),
            Some(SystemId::new([0, 0, 0, 0, 0, 2]))
        );
        assert_eq!(elect([]), None);
    }
}
