use super::matcher::{GroupSet, matches_group};
use crate::auth::Identity;
use crate::config::AuthConfig;

/// Access decisions computed once from configuration at startup.
///
/// Two independent gates: general access (may the principal use the service
/// at all) and the approver role. Both evaluate the principal's raw
/// group-bearing claim values through the group matcher.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    allowed_group_names: GroupSet,
    allowed_group_ids: GroupSet,
    allowed_emails: GroupSet,
    approver_group_names: GroupSet,
    approver_group_ids: GroupSet,
}

impl AccessPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            allowed_group_names: GroupSet::new(&config.access.allowed_group_names),
            allowed_group_ids: GroupSet::from_ids(&config.access.allowed_group_ids),
            allowed_emails: GroupSet::new(&config.access.allowed_emails),
            approver_group_names: GroupSet::new(&config.approvers.group_names),
            approver_group_ids: GroupSet::from_ids(&config.approvers.group_ids),
        }
    }

    /// Whether any general-access allow-list is configured. When none is,
    /// the gate is disabled and every authenticated principal passes.
    pub fn restricts_general_access(&self) -> bool {
        !self.allowed_group_names.is_empty()
            || !self.allowed_group_ids.is_empty()
            || !self.allowed_emails.is_empty()
    }

    /// General access gate. Group ids are checked before names; the email
    /// allow-list is a direct case-insensitive membership check with no
    /// token splitting.
    pub fn allows_general_access(&self, identity: &Identity) -> bool {
        if !self.restricts_general_access() {
            return true;
        }

        if !self.allowed_group_ids.is_empty()
            && identity
                .group_values
                .iter()
                .any(|value| matches_group(value, &GroupSet::default(), &self.allowed_group_ids))
        {
            return true;
        }

        if !self.allowed_group_names.is_empty()
            && identity
                .group_values
                .iter()
                .any(|value| matches_group(value, &self.allowed_group_names, &GroupSet::default()))
        {
            return true;
        }

        if !self.allowed_emails.is_empty()
            && let Some(email) = identity.email.as_deref()
            && self.allowed_emails.contains(email)
        {
            return true;
        }

        false
    }

    /// Approver role gate. Fail-closed: with no approver groups configured,
    /// nobody is an approver.
    pub fn is_approver(&self, identity: &Identity) -> bool {
        if self.approver_group_names.is_empty() && self.approver_group_ids.is_empty() {
            return false;
        }

        identity.group_values.iter().any(|value| {
            matches_group(value, &self.approver_group_names, &self.approver_group_ids)
        })
    }
}
