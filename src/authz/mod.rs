//! Authorization: group-claim matching and the two policy gates.
//!
//! Identity providers deliver group membership in inconsistent shapes:
//! plain names, object-id GUIDs, or several tokens packed into one claim
//! value. The matcher normalizes all of them against configured allow-lists;
//! the policy composes the matcher into "may use the service" and
//! "is an approver" decisions.

mod matcher;
mod policy;

pub use matcher::{GroupSet, matches_group, normalize_guid};
pub use policy::AccessPolicy;
