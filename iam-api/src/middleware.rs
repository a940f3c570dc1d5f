//! Caller resolution.
//!
//! Requests identify their caller through the `X-User` header, which an
//! upstream proxy sets after authenticating the user. The header value is
//! looked up through the store; the resolved [`User`] (or its absence) is
//! handed to the store operations, which make every authorization decision.

use crate::constants::CALLER_HEADER;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use iam_core::{IamError, User, UserId};
use iam_storage::IamStore;
use std::convert::Infallible;

/// Typed Axum extractor for the calling user.
///
/// Never rejects. A missing or non-UTF-8 header, an unknown user and a
/// failed lookup all resolve to `Caller(None)`, which the store treats as
/// unauthenticated.
///
/// ```rust,no_run
/// use axum::Json;
/// use iam_api::middleware::Caller;
///
/// async fn whoami(Caller(caller): Caller) -> Json<Option<String>> {
///     Json(caller.map(|user| user.id.to_string()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Caller(pub Option<User>);

impl Caller {
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    IamStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(id) = caller_id(parts) else {
            return Ok(Caller(None));
        };

        let store = IamStore::from_ref(state);
        match store.get_user(&id).await {
            Ok(user) => Ok(Caller(Some(user))),
            Err(IamError::NotFound { .. }) => {
                tracing::debug!(caller = %id, "unknown caller");
                Ok(Caller(None))
            }
            Err(err) => {
                tracing::warn!(caller = %id, error = %err, "caller lookup failed");
                Ok(Caller(None))
            }
        }
    }
}

fn caller_id(parts: &Parts) -> Option<UserId> {
    let raw = parts.headers.get(CALLER_HEADER)?.to_str().ok()?;
    let id = UserId::from(raw.trim());
    (!id.is_empty()).then_some(id)
}
