//! Message models for the legal inference service.
//!
//! Field names follow the service's wire schema. Requests are built with the
//! service's default option flags already applied; responses decode leniently
//! so a remote that omits optional fields still produces a message.

mod requests;
mod responses;

pub use requests::*;
pub use responses::*;
