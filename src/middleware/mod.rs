pub mod auth;

pub use auth::{AuthState, AuthedCaller, auth_middleware};
