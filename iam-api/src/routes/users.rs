//! User REST API Routes
//!
//! Reads are open to any caller. Role edits require `admin` on `/`; profile
//! edits are allowed for the user themself or an admin. The store makes
//! every authorization decision, these handlers only translate.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use iam_core::{EditUser, Role, User, UserId, ROOT_PATH};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::middleware::Caller;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    /// Return users strictly after this id
    pub from: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchUsersQuery {
    /// Prefix of the id or display name
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct InRoleQuery {
    pub role: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InRoleResponse {
    pub user: UserId,
    pub role: String,
    pub path: String,
    pub in_role: bool,
}

/// Body of `PUT /users/:id/roles`. Replaces the whole role set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRolesRequest {
    #[serde(default)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: String,
    pub profile: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/v1/users - One page of users ordered by id
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let from = query.from.map(UserId::from);
    let users = state.store.list_users(from.as_ref()).await?;
    Ok(Json(users))
}

/// GET /api/v1/users/search - Users whose id or name starts with `q`
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchUsersQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let users = state.store.search_users(query.q.trim()).await?;
    Ok(Json(users))
}

/// GET /api/v1/users/:id - Get a user by id
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<User>> {
    let user = state.store.get_user(&UserId::from(id)).await?;
    Ok(Json(user))
}

/// GET /api/v1/users/:id/in-role - Whether the user holds a role over a path
pub async fn user_in_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<InRoleQuery>,
) -> ApiResult<Json<InRoleResponse>> {
    let id = UserId::from(id);
    let path = query.path.unwrap_or_else(|| ROOT_PATH.to_string());
    let in_role = state.store.user_in_role(&id, &path, &query.role).await?;
    Ok(Json(InRoleResponse {
        user: id,
        role: query.role,
        path,
        in_role,
    }))
}

/// PUT /api/v1/users/:id/roles - Replace a user's roles (admin only)
pub async fn update_roles(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateRolesRequest>,
) -> ApiResult<Json<User>> {
    let edit = EditUser::new(id, req.roles);
    let user = state.store.update_user(caller.user(), edit).await?;
    Ok(Json(user))
}

/// PUT /api/v1/users/:id/profile - Set display name and profile
pub async fn update_profile(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let user = state
        .store
        .enrich_profile(caller.user(), &UserId::from(id), &req.display_name, &req.profile)
        .await?;
    Ok(Json(user))
}

/// POST /api/v1/login - Record an access by the calling user
pub async fn login(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<User>> {
    let user = state.store.record_access(caller.user()).await?;
    Ok(Json(user))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Routes mounted under `/api/v1/users`.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/search", get(search_users))
        .route("/:id", get(get_user))
        .route("/:id/in-role", get(user_in_role))
        .route("/:id/roles", put(update_roles))
        .route("/:id/profile", put(update_profile))
}

/// Routes mounted directly under `/api/v1`.
pub fn create_session_router() -> Router<AppState> {
    Router::new().route("/login", post(login))
}
