//! Signed-in project lookup.

use parking_lot::RwLock;

/// Tells the store and sync engine which project is signed in.
pub trait LoginInfo: Send + Sync {
    /// Returns the signed-in project id, if any.
    fn signed_in_project_id(&self) -> Option<String>;

    /// Returns the signed-in user id, if any.
    fn signed_in_user_id(&self) -> Option<String> {
        None
    }
}

/// A [`LoginInfo`] holding values set by the caller.
#[derive(Debug, Default)]
pub struct StaticLogin {
    project_id: RwLock<Option<String>>,
    user_id: RwLock<Option<String>>,
}

impl StaticLogin {
    /// Creates a login signed in to `project_id` as `user_id`.
    pub fn signed_in(project_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            project_id: RwLock::new(Some(project_id.into())),
            user_id: RwLock::new(Some(user_id.into())),
        }
    }

    /// Creates a signed-out login.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Signs out.
    pub fn sign_out(&self) {
        *self.project_id.write() = None;
        *self.user_id.write() = None;
    }
}

impl LoginInfo for StaticLogin {
    fn signed_in_project_id(&self) -> Option<String> {
        self.project_id.read().clone().filter(|p| !p.is_empty())
    }

    fn signed_in_user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_out_clears_project() {
        let login = StaticLogin::signed_in("p1", "u1");
        assert_eq!(login.signed_in_project_id().as_deref(), Some("p1"));
        login.sign_out();
        assert!(login.signed_in_project_id().is_none());
        assert!(login.signed_in_user_id().is_none());
    }

    #[test]
    fn empty_project_counts_as_signed_out() {
        let login = StaticLogin::signed_in("", "u1");
        assert!(login.signed_in_project_id().is_none());
    }
}
