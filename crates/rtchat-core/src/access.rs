use crate::errors::ChatError;
use crate::ids::UserId;
use crate::models::Group;

/// Decides whether a user may join a group.
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, group: &Group, user: &UserId) -> Result<(), ChatError>;
}

/// Public groups are open to everyone; private groups admit listed members only.
#[derive(Clone, Copy, Debug, Default)]
pub struct MembershipPolicy;

impl AccessPolicy for MembershipPolicy {
    fn authorize(&self, group: &Group, user: &UserId) -> Result<(), ChatError> {
        if group.is_private && !group.is_member(user) {
            return Err(ChatError::Forbidden(format!(
                "{user} is not a member of {}",
                group.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GroupId;

    fn group(is_private: bool) -> Group {
        Group {
            id: GroupId::from("room"),
            is_private,
            members: vec![UserId::from("alice")],
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn public_group_admits_anyone() {
        assert!(MembershipPolicy.authorize(&group(false), &UserId::from("bob")).is_ok());
    }

    #[test]
    fn private_group_admits_members() {
        assert!(MembershipPolicy.authorize(&group(true), &UserId::from("alice")).is_ok());
    }

    #[test]
    fn private_group_rejects_outsiders() {
        let err = MembershipPolicy
            .authorize(&group(true), &UserId::from("bob"))
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }
}
