mod auth;

pub use auth::{AuthedUser, Claims, DepotExt, auth_by_token, issue_token};
