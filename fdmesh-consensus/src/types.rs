//! Core types for the Chandra–Toueg rotating-coordinator engine (spec.md
//! §4.4): the membership/round arithmetic and the `Preference` record
//! exchanged to decide a round's winner.

use chrono::{DateTime, Utc};
use fdmesh_network::Endpoint;
use serde::{Deserialize, Serialize};

/// A node's candidate value plus the UTC timestamp used to break ties
/// across a quorum (spec.md §9: clock skew across nodes affects which
/// preference wins, so this field is UTC wallclock, not the monotonic
/// millisecond clock used for detector timing).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preference {
    pub round: u64,
    pub preference: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub from: Endpoint,
}

/// Given the member list `sortAsc(neighbors ∪ {self})`, returns the
/// coordinator for round `r`: `members[r mod N]`.
pub fn coordinator(members: &[Endpoint], round: u64) -> Endpoint {
    let n = members.len() as u64;
    members[(round % n) as usize].clone()
}

/// `⌊N/2⌋+1`, strictly more than half the membership.
pub fn quorum(member_count: usize) -> usize {
    member_count / 2 + 1
}

/// Builds the sorted member list `sortAsc(neighbors ∪ {self})` used for
/// coordinator selection (spec.md §4.4).
pub fn sorted_members(self_endpoint: &Endpoint, neighbors: &[Endpoint]) -> Vec<Endpoint> {
    let mut members: Vec<Endpoint> = neighbors.to_vec();
    members.push(self_endpoint.clone());
    members.sort();
    members.dedup();
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_strictly_more_than_half() {
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
    }

    #[test]
    fn coordinator_wraps_with_modulo() {
        let members = vec![Endpoint::new("a", 1), Endpoint::new("b", 2), Endpoint::new("c", 3)];
        assert_eq!(coordinator(&members, 0), members[0]);
        assert_eq!(coordinator(&members, 1), members[1]);
        assert_eq!(coordinator(&members, 3), members[0]);
    }

    #[test]
    fn sorted_members_includes_self_and_dedups() {
        let me = Endpoint::new("b", 2);
        let neighbors = vec![Endpoint::new("a", 1), Endpoint::new("c", 3)];
        let members = sorted_members(&me, &neighbors);
        assert_eq!(members, vec![Endpoint::new("a", 1), Endpoint::new("b", 2), Endpoint::new("c", 3)]);
    }
}
