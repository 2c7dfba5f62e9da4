//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Try-on** (`POST /api/try-on`): person photo plus garment photo in, result URL out
//! - **Status** (`GET /`, `GET /healthz`): liveness for the storefront and orchestrators
//!
//! Generated images are served from the configured public prefix (default `/static`), outside
//! this module. API documentation is available at `/docs` when the server is running.

pub mod handlers;
pub mod models;
