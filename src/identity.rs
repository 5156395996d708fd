use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Authenticated caller handed down by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i32,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: i32) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: i32) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    pub fn can_access(&self, owner_id: i32) -> bool {
        self.is_admin || self.user_id == owner_id
    }

    pub fn ensure_owner_or_admin(&self, owner_id: i32, entity: &str, id: i64) -> AppResult<()> {
        if self.can_access(owner_id) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "{entity} {id} belongs to another user"
            )))
        }
    }

    pub fn ensure_admin(&self, action: &str) -> AppResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::forbidden(format!("{action} requires admin")))
        }
    }
}
