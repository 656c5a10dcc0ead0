//! Deciding who takes which role next.

use crate::rotation::{Assignment, RotationState};

/// Produces the next role assignment from the current one.
///
/// Implementations must be deterministic and must keep the same set of
/// people: nobody is added, dropped or duplicated. The timer is not theirs
/// to touch.
pub trait RotationPolicy {
    fn rotate(&self, roles: &[Assignment], tail: &[String]) -> (Vec<Assignment>, Vec<String>);

    /// Applies the policy to a whole state, leaving the timer as it was.
    fn apply(&self, state: &RotationState) -> RotationState {
        let (roles, tail) = self.rotate(&state.roles, &state.tail);
        RotationState {
            timer: state.timer,
            roles,
            tail,
        }
    }
}

/// Everyone moves up one place: role holders then the tail form a single
/// line-up, the person at the front goes to the back of the tail and role
/// names stay where they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl RotationPolicy for RoundRobin {
    fn rotate(&self, roles: &[Assignment], tail: &[String]) -> (Vec<Assignment>, Vec<String>) {
        let mut lineup: Vec<&str> = roles
            .iter()
            .map(|a| a.member.as_str())
            .chain(tail.iter().map(String::as_str))
            .collect();
        if !lineup.is_empty() {
            lineup.rotate_left(1);
        }

        let (holders, rest) = lineup.split_at(roles.len());
        let roles = roles
            .iter()
            .zip(holders)
            .map(|(slot, member)| Assignment::new(slot.role.clone(), *member))
            .collect();
        let tail = rest.iter().map(|m| m.to_string()).collect();
        (roles, tail)
    }
}
