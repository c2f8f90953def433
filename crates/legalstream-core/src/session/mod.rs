//! Duplex sessions.
//!
//! - **Registry**: maps session ids to live handles, one handle per id
//! - **Handle**: state machine and serialized write path for one stream
//! - **Dispatcher**: background task draining the stream into the sink

pub(crate) mod dispatcher;
pub mod handle;
pub mod registry;

pub use handle::{SessionHandle, SessionState};
pub use registry::SessionRegistry;
