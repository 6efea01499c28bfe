//! HTTP middleware making up the request pipeline.
//!
//! - **Error Handling**: Uniform JSON envelope for every failure, panics included
//! - **Security Headers**: Hardening headers on every response
//! - **Origin Guard / CORS**: Allow-list plus trusted suffixes, credentialed CORS
//! - **Rate Limiting**: Fixed window per client, scoped to `/api`
//! - **Body Decoding**: JSON and URL-encoded bodies up to a size ceiling
//! - **Access Log**: One span and one line per request
//!
//! # Architecture
//!
//! ```text
//! Request → Error Handler → Request ID → Catch Panic → Security Headers
//!         → Origin Guard → CORS → Rate Limit → Body Decode → Compression
//!         → Access Log → Router
//!                ↓             ↓           ↓
//!              403 CORS      429       413 / 400
//! ```
//!
//! Rejections from inner stages still pass back out through the outer ones, so
//! a 429 carries the security and CORS headers and a 403 is rendered by the
//! error handler.

pub mod access_log;
pub mod body;
pub mod error_handler;
pub mod ip;
pub mod origin;
pub mod rate_limit;
pub mod security_headers;

pub use access_log::{AccessLogLayer, AccessLogMode, access_log_layer};
pub use body::{BodyLimit, DecodedBody, Payload, decode_body, decode_form};
pub use error_handler::{handle_errors, panic_response};
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, client_identity};
pub use origin::{OriginDecision, OriginGuardLayer, OriginPolicy, cors_layer};
pub use rate_limit::{
    Clock, FixedWindowLimiter, ManualClock, MemoryWindowStore, RateLimitDecision, RateLimitLayer,
    SystemClock, WindowStore, is_rate_limited_path,
};
pub use security_headers::{SECURITY_HEADERS, with_security_headers};
