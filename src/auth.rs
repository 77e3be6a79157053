use std::fmt;

use crate::error::DashboardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Student,
    Teacher,
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Student => f.write_str("student"),
            View::Teacher => f.write_str("teacher"),
        }
    }
}

/// Resolves a user id to the role it was registered with.
pub trait IdentityProvider {
    fn role_of(&self, user_id: &str) -> Option<Role>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn authorize(&self, view: View) -> Result<(), DashboardError> {
        let allowed = matches!(
            (self.role, view),
            (Role::Admin, _) | (Role::Student, View::Student) | (Role::Teacher, View::Teacher)
        );
        if allowed {
            Ok(())
        } else {
            Err(DashboardError::Forbidden {
                user_id: self.user_id.clone(),
                role: self.role,
                view,
            })
        }
    }
}

pub fn authenticate<P>(provider: &P, user_id: &str) -> Result<Identity, DashboardError>
where
    P: IdentityProvider + ?Sized,
{
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(DashboardError::MissingId("user"));
    }

    let role = provider
        .role_of(user_id)
        .ok_or_else(|| DashboardError::UnknownUser(user_id.to_string()))?;

    tracing::debug!(user_id, %role, "authenticated caller");
    Ok(Identity {
        user_id: user_id.to_string(),
        role,
    })
}
