use serde::{Deserialize, Serialize};

/// Progress of a single prerequisite. Variants are declared in lifecycle
/// order, so the derived `Ord` is the only allowed direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrereqStatus {
    Pending,
    Downloading,
    Ready,
    Installing,
    Done,
}

impl PrereqStatus {
    /// True when moving from `self` to `next` never goes backwards.
    pub fn can_advance_to(self, next: PrereqStatus) -> bool {
        next >= self
    }
}

/// An external redistributable required before a target can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrereqTask {
    pub name: String,
    pub full_name: String,
    pub order: usize,
    pub status: PrereqStatus,
}

impl PrereqTask {
    pub fn new(name: impl Into<String>, full_name: impl Into<String>, order: usize) -> Self {
        Self {
            name: name.into(),
            full_name: full_name.into(),
            order,
            status: PrereqStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_only_move_forward() {
        assert!(PrereqStatus::Pending.can_advance_to(PrereqStatus::Downloading));
        assert!(PrereqStatus::Ready.can_advance_to(PrereqStatus::Ready));
        assert!(PrereqStatus::Downloading.can_advance_to(PrereqStatus::Done));
        assert!(!PrereqStatus::Installing.can_advance_to(PrereqStatus::Ready));
        assert!(!PrereqStatus::Done.can_advance_to(PrereqStatus::Pending));
    }
}
