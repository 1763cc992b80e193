use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Organizer,
    Admin,
}

/// Identity handed over by the authentication layer. Trusted as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn user(id: UserId) -> Self {
        Self::new(id, Role::User)
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Organizer | Role::Admin)
    }
}
