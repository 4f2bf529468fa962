// src/access.rs
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{PaintRequest, User};
use crate::store::Store;

/// Identity of the caller as established from a verified token.
#[derive(Clone, Debug, PartialEq)]
pub struct Actor {
    pub user_id: Uuid,
    /// Role claim carried by the token. Only good for coarse routing;
    /// privileged operations re-read the role from the store.
    pub claims_moderator: bool,
}

impl Actor {
    pub fn new(user_id: Uuid, claims_moderator: bool) -> Self {
        Actor {
            user_id,
            claims_moderator,
        }
    }
}

/// Loads the caller's user record. A token for a user that no longer exists
/// is treated as unauthenticated.
pub async fn current_user(store: &dyn Store, actor: &Actor) -> AppResult<User> {
    store
        .get_user(actor.user_id)
        .await?
        .ok_or(AppError::Unauthorized)
}

/// Moderation gate. The persisted flag decides, whatever the token claims.
pub async fn require_moderator(store: &dyn Store, actor: &Actor) -> AppResult<User> {
    let user = current_user(store, actor).await?;
    if !user.is_moderator {
        if actor.claims_moderator {
            tracing::warn!(
                "User {} presented a moderator claim without the persisted role",
                actor.user_id
            );
        }
        return Err(AppError::not_allowed("moderator role required"));
    }
    Ok(user)
}

pub fn can_view(user: &User, request: &PaintRequest) -> bool {
    user.is_moderator || request.creator_id == user.id
}

pub fn require_creator(actor: &Actor, request: &PaintRequest) -> AppResult<()> {
    if request.creator_id != actor.user_id {
        return Err(AppError::not_allowed(format!(
            "request {} belongs to another user",
            request.id
        )));
    }
    Ok(())
}

/// Resolves the moderator flag requested by a profile update. Users cannot
/// grant themselves the role; such a request keeps the current value.
pub fn resolve_role_change(current: &User, requested: Option<bool>) -> bool {
    match requested {
        Some(true) if !current.is_moderator => {
            tracing::warn!(
                "User {} tried to grant themselves the moderator role, ignoring",
                current.id
            );
            false
        }
        Some(requested) => requested,
        None => current.is_moderator,
    }
}
