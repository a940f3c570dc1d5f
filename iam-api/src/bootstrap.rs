//! Startup seeding of the configured administrator.

use iam_core::{is_admin, EditUser, IamError, IamResult, Role, User, UserId, ADMIN_ROLE, ROOT_PATH};
use iam_storage::IamStore;

/// Make sure `admin_id` exists and holds `admin` on `/`.
///
/// A missing user is created with that single grant. An existing user
/// without it gets the grant appended to its current roles. Both writes go
/// through the normal role edit, so they leave an audit event attributed to
/// the admin itself.
pub async fn seed_admin(store: &IamStore, admin_id: &UserId) -> IamResult<User> {
    let grant = Role::new(ADMIN_ROLE, ROOT_PATH);
    // Nobody can authorize the very first grant, so the admin vouches for itself.
    let seed_caller = User::new(admin_id.clone(), vec![grant.clone()]);

    let edit = match store.get_user(admin_id).await {
        Ok(user) if is_admin(Some(&user)) => {
            tracing::debug!(admin = %admin_id, "admin user already provisioned");
            return Ok(user);
        }
        Ok(user) => {
            tracing::info!(admin = %admin_id, "granting admin role to existing user");
            user.edit().with_role(grant)
        }
        Err(IamError::NotFound { .. }) => {
            tracing::info!(admin = %admin_id, "creating admin user");
            EditUser::new(admin_id.clone(), vec![grant])
        }
        Err(err) => return Err(err),
    };

    store.update_user(Some(&seed_caller), edit).await
}
