mod auth;
mod endpoints;
mod models;

pub use auth::{AuthClient, AuthClientError};
pub use endpoints::{ApiEndpoints, DEFAULT_BASE_URL, Route};
pub use models::{FsItem, FsListing, LoginRequest, RefreshRequest, TokenGrant, parse_change_paths};
