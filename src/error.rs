use crate::auth::{Role, View};

/// Caller contract violations. Lookup failures inside the aggregation
/// never surface here; they fall back to default values instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DashboardError {
    #[error("a {0} id is required")]
    MissingId(&'static str),
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("{role} {user_id} cannot open the {view} dashboard")]
    Forbidden {
        user_id: String,
        role: Role,
        view: View,
    },
}
