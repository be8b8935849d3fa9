//! User management: listing accounts, changing roles and deleting accounts

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Json,
};
use gatekeeper_security::Role;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::{
    error::{ApiError, Result},
    extract::JsonBody,
    middleware_layer::gate::RequestContext,
    services::directory::UserProfile,
    state::AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 32, message = "Role is required"))]
    pub role: String,
}

/// GET /api/users
pub async fn list_users(State(state): State<AppState>) -> Json<Vec<UserProfile>> {
    Json(state.directory.list().iter().map(UserProfile::from).collect())
}

/// PATCH /api/users/:id/role
pub async fn update_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(user_id): Path<String>,
    JsonBody(payload): JsonBody<UpdateRoleRequest>,
) -> Result<Json<UserProfile>> {
    payload.validate()?;
    let caller = ctx.require_identity()?;

    let new_role = Role::parse(&payload.role);
    if !new_role.is_known() {
        return Err(ApiError::validation("role", "Unknown role"));
    }

    let target = state
        .directory
        .get(&user_id)
        .ok_or_else(|| ApiError::not_found("User"))?;

    // Only a super admin may create or demote another super admin
    let touches_super_admin = target.role == Role::SuperAdmin || new_role == Role::SuperAdmin;
    if touches_super_admin && caller.role != Role::SuperAdmin {
        return Err(ApiError::forbidden(
            "Only a super admin can grant or revoke the super admin role",
        ));
    }

    let updated = state
        .directory
        .set_role(&user_id, new_role)
        .ok_or_else(|| ApiError::not_found("User"))?;
    let revoked = state.services.sessions.destroy_subject(&user_id).await?;

    info!(
        user_id = %updated.id,
        role = %updated.role,
        changed_by = %caller.subject_id,
        revoked_sessions = revoked,
        "User role updated"
    );

    Ok(Json(UserProfile::from(&updated)))
}

/// DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    let caller = ctx.require_identity()?;

    let target = state
        .directory
        .get(&user_id)
        .ok_or_else(|| ApiError::not_found("User"))?;

    if target.role == Role::SuperAdmin {
        return Err(ApiError::forbidden("Super admin accounts cannot be deleted"));
    }
    if target.id == caller.subject_id {
        return Err(ApiError::validation("id", "You cannot delete your own account"));
    }

    // Re-checked under the entry lock in case the target was promoted meanwhile
    state.directory.remove_unless_super_admin(&user_id)?;
    let revoked = state.services.sessions.destroy_subject(&user_id).await?;

    info!(
        user_id = %user_id,
        deleted_by = %caller.subject_id,
        revoked_sessions = revoked,
        "User deleted"
    );

    Ok(StatusCode::NO_CONTENT)
}
