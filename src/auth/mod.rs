//! Bearer-token authentication and route authorization.
//!
//! Tokens are issued by an external identity provider and verified against
//! its published key set. Which routes need a token is decided by the
//! [`PermissionTable`](crate::permissions::PermissionTable).

mod authorizer;
mod errors;
mod identity;
mod middleware;
mod request;

pub use authorizer::{Authorizer, Decision, SELF_SERVICE_PREFIX, WILDCARD_AUDIENCE};
pub use errors::{AuthError, bearer_challenge};
pub use identity::{Identity, MaybeIdentity, RequireIdentity, TOKEN_CLAIMS};
pub use middleware::authorize_request;
pub use request::{ACCESS_TOKEN_NAME, REFRESH_TOKEN_NAME, RequestFacts};
