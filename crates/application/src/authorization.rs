use nada_core::{AppError, AppResult, User};

/// Fails with `Unauthorized` unless the user is a member of `group`.
pub fn ensure_user_in_group(user: &User, group: &str) -> AppResult<()> {
    if user.is_member_of(group) {
        return Ok(());
    }

    Err(AppError::Unauthorized(format!(
        "user '{}' is not a member of group '{group}'",
        user.email()
    )))
}

#[cfg(test)]
mod tests {
    use nada_core::{AppError, Group, User};

    use super::ensure_user_in_group;

    #[test]
    fn non_members_are_unauthorized() {
        let user = User::new(
            "Ola",
            "ola@nav.no",
            vec![Group {
                name: "team-a".to_owned(),
                email: "team-a@nav.no".to_owned(),
            }],
        );

        assert!(ensure_user_in_group(&user, "team-a@nav.no").is_ok());
        assert!(matches!(
            ensure_user_in_group(&user, "team-b@nav.no"),
            Err(AppError::Unauthorized(_))
        ));
    }
}
