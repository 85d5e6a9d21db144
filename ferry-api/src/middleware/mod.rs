pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, operator_middleware, Claims, Role};
pub use rate_limit::rate_limit_middleware;
