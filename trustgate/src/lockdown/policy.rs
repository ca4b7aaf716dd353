//! Role policy table for privileged operations.

use crate::auth::Role;

/// What a role may do. One row per role; callers look the row up instead of
/// branching on the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePolicy {
    pub can_execute_directly: bool,
    pub requires_reason: bool,
    pub can_request: bool,
    pub can_review: bool,
    pub can_manage_devices: bool,
    pub can_view_activity: bool,
    /// Highest role whose accounts (and sessions) this role may target
    pub max_target_role: Option<Role>,
}

const USER_POLICY: RolePolicy = RolePolicy {
    can_execute_directly: false,
    requires_reason: false,
    can_request: false,
    can_review: false,
    can_manage_devices: false,
    can_view_activity: false,
    max_target_role: None,
};

const ADMIN_POLICY: RolePolicy = RolePolicy {
    can_execute_directly: false,
    requires_reason: true,
    can_request: true,
    can_review: false,
    can_manage_devices: true,
    can_view_activity: true,
    max_target_role: Some(Role::User),
};

const SUPERADMIN_POLICY: RolePolicy = RolePolicy {
    can_execute_directly: true,
    requires_reason: false,
    can_request: true,
    can_review: true,
    can_manage_devices: true,
    can_view_activity: true,
    max_target_role: Some(Role::Superadmin),
};

impl RolePolicy {
    pub const fn for_role(role: Role) -> &'static RolePolicy {
        match role {
            Role::User => &USER_POLICY,
            Role::Admin => &ADMIN_POLICY,
            Role::Superadmin => &SUPERADMIN_POLICY,
        }
    }

    pub fn may_target(&self, target: Role) -> bool {
        self.max_target_role.is_some_and(|max| target <= max)
    }
}

impl Role {
    pub const fn policy(self) -> &'static RolePolicy {
        RolePolicy::for_role(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_has_no_privileges() {
        let policy = Role::User.policy();
        assert!(!policy.can_request);
        assert!(!policy.can_review);
        assert!(!policy.may_target(Role::User));
    }

    #[test]
    fn test_admin_requests_with_reason() {
        let policy = Role::Admin.policy();
        assert!(policy.can_request);
        assert!(policy.requires_reason);
        assert!(!policy.can_execute_directly);
        assert!(!policy.can_review);
        assert!(policy.may_target(Role::User));
        assert!(!policy.may_target(Role::Admin));
    }

    #[test]
    fn test_superadmin_executes_and_reviews() {
        let policy = Role::Superadmin.policy();
        assert!(policy.can_execute_directly);
        assert!(policy.can_review);
        assert!(!policy.requires_reason);
        assert!(policy.may_target(Role::Superadmin));
    }
}
