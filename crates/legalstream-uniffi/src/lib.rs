//! UniFFI bindings for legalstream-core.
//!
//! Exposes the streaming client to Python, Kotlin, Swift and C# hosts.
//! Host callbacks are adapted to the core's sink interface; every inbound
//! message crosses the boundary as a JSON string.
//!
//! # Usage
//!
//! Generate bindings using `--library` mode:
//!
//! ```bash
//! # Build the cdylib
//! cargo build -p legalstream-uniffi --release
//!
//! # Generate Python bindings
//! legalstream-uniffi-bindgen generate --library --language python \
//!     --out-dir ./bindings/python target/release/liblegalstream_uniffi.so
//! ```

// UniFFI scaffolding - this generates the FFI glue code
uniffi::setup_scaffolding!();

#[cfg(feature = "bindings")]
mod bindings;

#[cfg(feature = "bindings")]
pub use bindings::*;

/// Get the version of the legalstream-uniffi bindings.
#[uniffi::export]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
