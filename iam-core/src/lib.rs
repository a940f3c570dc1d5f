//! iam4apis Core - Entity Types
//!
//! Users, role grants, audit events and the single authorization primitive
//! every mutation path goes through. No I/O lives in this crate.

pub mod authz;
pub mod clock;
pub mod error;
pub mod model;

pub use authz::{is_admin, is_in_role, ADMIN_ROLE, ROOT_PATH};
pub use clock::{Clock, FixedClock, SteppingClock, SystemClock};
pub use error::{ConfigError, IamError, IamResult};
pub use model::{AdminEvent, EditUser, Role, Timestamp, User, UserId};
