//! Shared application state for Axum routers.

use iam_storage::IamStore;
use std::time::Instant;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Cache-aside facade over the backend. Every route goes through it.
    pub store: IamStore,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: IamStore) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }
}

/// `FromRef` for a cloneable field, so handlers can extract it directly.
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<AppState> for $type {
            fn from_ref(state: &AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

impl_from_ref!(IamStore, store);
impl_from_ref!(Instant, start_time);
