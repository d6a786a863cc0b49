//! Request handler module
//!
//! Resolves preview requests to files under the site root and rebuilds the
//! site on demand before serving HTML.

pub mod builder;
pub mod dispatcher;
pub mod router;

// Re-export main entry points
pub use dispatcher::Dispatcher;
pub use router::handle_request;
