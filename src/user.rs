//! Users are opaque identifiers to the matching core: it never inspects
//! `name` or `role` beyond what the edge layer (auth, admin endpoints)
//! already resolved into a `UserId` + `Role`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instrument::Visibility;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct User {
    #[bincode(with_serde)]
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub api_key: String,
    pub visibility: Visibility,
    #[bincode(with_serde)]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            role: Role::User,
            api_key: format!("key-{}", Uuid::new_v4()),
            visibility: Visibility::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.visibility == Visibility::Active
    }
}
