//! Strongly-typed identifiers.

use std::fmt;

/// Identifies a row in a task manager's table.
///
/// Rows are assigned sequentially as tasks (or named placeholders) are
/// registered during graph construction. IDs are only meaningful for the
/// graph they were issued by and become stale once that graph is reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    /// The row index this ID refers to.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TaskId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Monotonically increasing simulation step counter.
///
/// Step 0 means "no step has been launched yet"; each successful
/// `simulate` call launches the next step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub u64);

impl StepId {
    /// The step after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StepId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies an actor registered with a scene.
///
/// Actor IDs are never reused within a scene, so an ID held across a
/// removal can never alias a newer actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

impl From<u64> for ActorId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_index_matches_raw_value() {
        assert_eq!(TaskId(7).index(), 7);
        assert_eq!(TaskId::from(3u32), TaskId(3));
    }

    #[test]
    fn step_id_next_increments() {
        assert_eq!(StepId::default().next(), StepId(1));
        assert_eq!(StepId(41).next().to_string(), "42");
    }

    #[test]
    fn actor_id_display_is_tagged() {
        assert_eq!(ActorId(5).to_string(), "actor#5");
    }
}
