pub mod audit_log;
pub mod clock;
pub mod identity;
pub mod permissions;
pub mod rate_limiter;
pub mod session_manager;
pub mod user_admin;
pub mod workflow;
