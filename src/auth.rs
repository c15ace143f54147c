use anyhow::{anyhow, Result};

use crate::config::{Config, USER_ENV};
use crate::db::Database;

/// The coach acting on this invocation, re-derived for every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
}

pub fn configured_email(config: &Config) -> Result<&str> {
    config
        .user_email
        .as_deref()
        .ok_or_else(|| anyhow!("No user selected. Pass --user or set {}.", USER_ENV))
}

pub fn current_identity(db: &Database, config: &Config) -> Result<Identity> {
    let email = configured_email(config)?;
    let user = db
        .get_user_by_email(email)?
        .ok_or_else(|| anyhow!("No account for {}. Run 'coach signup' first.", email))?;
    Ok(Identity {
        user_id: user.id,
        email: user.email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_identity_requires_signup() {
        let db = Database::open_in_memory().unwrap();
        let config = Config::for_tests(PathBuf::from("/tmp/coachlog-auth"));

        let err = current_identity(&db, &config).unwrap_err();
        assert!(err.to_string().contains("coach signup"));

        let id = db.create_user("coach@example.com", "Coach", "", "").unwrap();
        let identity = current_identity(&db, &config).unwrap();
        assert_eq!(identity.user_id, id);
        assert_eq!(identity.email, "coach@example.com");
    }

    #[test]
    fn test_identity_requires_user() {
        let db = Database::open_in_memory().unwrap();
        let mut config = Config::for_tests(PathBuf::from("/tmp/coachlog-auth"));
        config.user_email = None;
        let err = current_identity(&db, &config).unwrap_err();
        assert!(err.to_string().contains("--user"));
    }
}
