//! HTTP access to the patch management console.
//!
//! Every request is buffered and logged (URL, method, request body and
//! status at info; response body at debug) before the caller decides what
//! a status code means.

pub mod client;

pub use client::{API_ROOT, ApiResponse, PatchApiClient, build_http_client};
