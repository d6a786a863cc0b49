//! HTTP protocol layer module
//!
//! MIME inference, `ETag` handling and response builders used by the
//! preview handler.

pub mod cache;
pub mod mime;
pub mod response;

// Re-export commonly used types
pub use response::{
    build_304_response, build_404_response, build_500_response, build_file_response,
};
