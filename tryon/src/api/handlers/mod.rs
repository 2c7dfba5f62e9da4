//! HTTP request handlers.
//!
//! - [`status`]: service banner and health check
//! - [`try_on`]: multipart try-on uploads

pub mod status;
pub mod try_on;
