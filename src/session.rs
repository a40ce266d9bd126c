use crate::error::ChatError;
use crate::models::User;

/// Who is logged in. Passed explicitly to whatever needs the local identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_logged_in: bool,
    pub user: Option<User>,
}

impl Session {
    pub fn logged_in(user: User) -> Self {
        Session { is_logged_in: true, user: Some(user) }
    }

    pub fn logged_out() -> Self {
        Session::default()
    }

    /// The logged-in user, or `NotLoggedIn`.
    pub fn require_user(&self) -> Result<&User, ChatError> {
        match (&self.user, self.is_logged_in) {
            (Some(user), true) => Ok(user),
            _ => Err(ChatError::NotLoggedIn),
        }
    }

    pub fn logout(&mut self) {
        self.is_logged_in = false;
        self.user = None;
    }
}
