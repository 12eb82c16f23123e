use serde::Serialize;

use crate::backend::User;

/// Emails allowed into the admin console. Matching ignores case and
/// surrounding whitespace.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    admins: Vec<String>,
}

impl AdminPolicy {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            admins: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, email: &str) -> bool {
        let email = email.trim().to_ascii_lowercase();
        self.admins.iter().any(|a| *a == email)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("You must sign in to access the admin panel.")]
    Unauthenticated,

    #[error("You do not have permission to access the admin panel.")]
    Forbidden,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
        }
    }
}

/// What the current session is allowed to do. Decided once when the session
/// changes and consulted by every guarded operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Authorizer {
    #[default]
    Anonymous,
    AuthenticatedUser(User),
    AdminUser(User),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuAction {
    Register,
    Login,
    Activities,
    Users,
    Logout,
    Admin,
}

impl MenuAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Register => "Sign up",
            Self::Login => "Sign in",
            Self::Activities => "Activities",
            Self::Users => "Users",
            Self::Logout => "Sign out",
            Self::Admin => "Admin",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::Activities => "activities",
            Self::Users => "users",
            Self::Logout => "logout",
            Self::Admin => "admin",
        }
    }
}

impl Authorizer {
    pub fn decide(user: Option<User>, policy: &AdminPolicy) -> Self {
        match user {
            None => Self::Anonymous,
            Some(u) if policy.is_admin(&u.email) => Self::AdminUser(u),
            Some(u) => Self::AuthenticatedUser(u),
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Anonymous => None,
            Self::AuthenticatedUser(u) | Self::AdminUser(u) => Some(u),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::AuthenticatedUser(_) => "user",
            Self::AdminUser(_) => "admin",
        }
    }

    pub fn require_user(&self) -> Result<&User, AuthError> {
        self.user().ok_or(AuthError::Unauthenticated)
    }

    pub fn require_admin(&self) -> Result<&User, AuthError> {
        match self {
            Self::Anonymous => Err(AuthError::Unauthenticated),
            Self::AuthenticatedUser(_) => Err(AuthError::Forbidden),
            Self::AdminUser(u) => Ok(u),
        }
    }

    pub fn menu(&self) -> Vec<MenuAction> {
        use MenuAction::*;
        match self {
            Self::Anonymous => vec![Register, Login],
            Self::AuthenticatedUser(_) => vec![Activities, Users, Logout],
            Self::AdminUser(_) => vec![Activities, Users, Logout, Admin],
        }
    }
}
