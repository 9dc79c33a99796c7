use serde::{Deserialize, Serialize};

/// Group membership resolved for an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Display name of the group.
    pub name: String,
    /// Group email used for ownership and access subjects.
    pub email: String,
}

/// Authenticated principal performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    name: String,
    email: String,
    groups: Vec<Group>,
}

impl User {
    /// Creates a user principal from identity provider data.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>, groups: Vec<Group>) -> Self {
        Self {
            name: name.into(),
            email: email.into().to_lowercase(),
            groups,
        }
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the lowercased email.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns the groups the user belongs to.
    #[must_use]
    pub fn groups(&self) -> &[Group] {
        self.groups.as_slice()
    }

    /// Returns whether the user is a member of the group with this email.
    #[must_use]
    pub fn is_member_of(&self, group_email: &str) -> bool {
        self.groups
            .iter()
            .any(|group| group.email.eq_ignore_ascii_case(group_email))
    }
}

#[cfg(test)]
mod tests {
    use super::{Group, User};

    #[test]
    fn group_membership_ignores_case() {
        let user = User::new(
            "Ola",
            "Ola@Nav.no",
            vec![Group {
                name: "team".to_owned(),
                email: "Team@nav.no".to_owned(),
            }],
        );

        assert_eq!(user.email(), "ola@nav.no");
        assert!(user.is_member_of("team@nav.no"));
        assert!(!user.is_member_of("other@nav.no"));
    }
}
