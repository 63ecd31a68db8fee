//! Token bookkeeping for applications authenticating against the store
//!
//! Signing and verifying access tokens is left to the application. This
//! module keeps the state that has to outlive a process: revoked token ids,
//! refresh tokens, and request budgets.

pub mod blacklist;
pub mod rate_limit;
pub mod refresh;

pub use blacklist::{BlacklistEntry, TokenBlacklist};
pub use rate_limit::{RateLimitInfo, RateLimitRule, RateLimiter, default_rules};
pub use refresh::{IssuedToken, RefreshToken, RefreshTokenStore, SessionInfo, hash_token};
