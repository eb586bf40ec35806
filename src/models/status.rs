use serde::{Deserialize, Serialize};

/// Lifecycle status of a change request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Submitted, awaiting approval
    New,
    /// Approved and cleared for implementation
    Approved,
    /// Implementation paused
    OnHold,
    /// Implemented successfully (terminal)
    Complete,
    /// Approved but never implemented (terminal)
    Abandoned,
    /// Rejected or withdrawn before approval (terminal)
    Cancelled,
}

impl ChangeStatus {
    /// Text form used for database storage and audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::New => "New",
            ChangeStatus::Approved => "Approved",
            ChangeStatus::OnHold => "OnHold",
            ChangeStatus::Complete => "Complete",
            ChangeStatus::Abandoned => "Abandoned",
            ChangeStatus::Cancelled => "Cancelled",
        }
    }

    /// Terminal statuses have no outgoing transitions for any role.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChangeStatus::Complete | ChangeStatus::Abandoned | ChangeStatus::Cancelled
        )
    }

    /// Every status a caller with the given roles may move this request to.
    ///
    /// Approvers gate the front of the lifecycle: only they can approve or
    /// cancel a request still in New. Once approved, either the approver or
    /// the requestor who owns the request can drive it to completion, pause
    /// it, or abandon it. A caller with neither role gets an empty set, as
    /// does any terminal status.
    pub fn available_next_states(self, is_approver: bool, is_owner: bool) -> Vec<ChangeStatus> {
        if !is_approver && !is_owner {
            return Vec::new();
        }
        match self {
            ChangeStatus::New if is_approver => {
                vec![ChangeStatus::Approved, ChangeStatus::Cancelled]
            }
            ChangeStatus::New => Vec::new(),
            ChangeStatus::Approved => vec![
                ChangeStatus::Complete,
                ChangeStatus::OnHold,
                ChangeStatus::Abandoned,
            ],
            ChangeStatus::OnHold => vec![ChangeStatus::Complete, ChangeStatus::Abandoned],
            ChangeStatus::Complete | ChangeStatus::Abandoned | ChangeStatus::Cancelled => {
                Vec::new()
            }
        }
    }

    /// Whether a transition from `self` to `target` is legal for the caller.
    pub fn can_transition_to(self, target: ChangeStatus, is_approver: bool, is_owner: bool) -> bool {
        self.available_next_states(is_approver, is_owner)
            .contains(&target)
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(ChangeStatus::New),
            "Approved" => Ok(ChangeStatus::Approved),
            "OnHold" => Ok(ChangeStatus::OnHold),
            "Complete" => Ok(ChangeStatus::Complete),
            "Abandoned" => Ok(ChangeStatus::Abandoned),
            "Cancelled" => Ok(ChangeStatus::Cancelled),
            _ => Err(format!("Invalid change status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ChangeStatus::*;
    use super::*;

    #[rstest]
    #[case::new_as_approver(New, true, false, vec![Approved, Cancelled])]
    #[case::new_as_owner(New, false, true, vec![])]
    #[case::new_as_both(New, true, true, vec![Approved, Cancelled])]
    #[case::approved_as_approver(Approved, true, false, vec![Complete, OnHold, Abandoned])]
    #[case::approved_as_owner(Approved, false, true, vec![Complete, OnHold, Abandoned])]
    #[case::on_hold_as_approver(OnHold, true, false, vec![Complete, Abandoned])]
    #[case::on_hold_as_owner(OnHold, false, true, vec![Complete, Abandoned])]
    fn next_states_by_role(
        #[case] from: ChangeStatus,
        #[case] is_approver: bool,
        #[case] is_owner: bool,
        #[case] expected: Vec<ChangeStatus>,
    ) {
        assert_eq!(from.available_next_states(is_approver, is_owner), expected);
    }

    #[rstest]
    #[case::complete(Complete)]
    #[case::abandoned(Abandoned)]
    #[case::cancelled(Cancelled)]
    fn terminal_states_have_no_exits(#[case] status: ChangeStatus) {
        assert!(status.is_terminal());
        assert!(status.available_next_states(true, true).is_empty());
        assert!(status.available_next_states(true, false).is_empty());
        assert!(status.available_next_states(false, true).is_empty());
    }

    #[rstest]
    #[case::new(New)]
    #[case::approved(Approved)]
    #[case::on_hold(OnHold)]
    #[case::complete(Complete)]
    fn no_role_means_no_transitions(#[case] status: ChangeStatus) {
        assert!(status.available_next_states(false, false).is_empty());
    }

    #[test]
    fn available_states_are_stable_across_calls() {
        let first = Approved.available_next_states(false, true);
        let second = Approved.available_next_states(false, true);
        assert_eq!(first, second);
    }

    #[test]
    fn owner_cannot_approve() {
        assert!(!New.can_transition_to(Approved, false, true));
        assert!(New.can_transition_to(Approved, true, false));
    }

    #[test]
    fn approved_cannot_return_to_new() {
        assert!(!Approved.can_transition_to(New, true, true));
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [New, Approved, OnHold, Complete, Abandoned, Cancelled] {
            assert_eq!(status.as_str().parse::<ChangeStatus>(), Ok(status));
        }
        assert!("Rejected".parse::<ChangeStatus>().is_err());
    }
}
