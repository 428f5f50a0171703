//! The caller on whose behalf a domain operation runs.
//!
//! Credential parsing happens in the surrounding API layer; by the time a
//! request reaches the domain, the caller has been reduced to one of these.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Member of the administrator group
    Admin,
    /// Another service presenting the shared API token
    Api,
    /// A logged-in user identified by their login subject
    User { subject: String },
    /// No credentials at all
    Anonymous,
}

impl Actor {
    pub fn user(subject: &str) -> Self {
        Actor::User {
            subject: subject.to_string(),
        }
    }

    /// Admins and API clients bypass all per-attendee authorization checks.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Actor::Admin | Actor::Api)
    }

    pub fn subject(&self) -> Option<&str> {
        match self {
            Actor::User { subject } => Some(subject),
            _ => None,
        }
    }
}
