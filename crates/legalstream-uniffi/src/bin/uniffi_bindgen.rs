/// Custom uniffi-bindgen binary for generating language bindings.
///
/// Generates Python/Kotlin/Swift bindings from the compiled
/// legalstream-uniffi cdylib.
///
/// Usage:
///   cargo run -p legalstream-uniffi --features cli --bin legalstream-uniffi-bindgen -- \
///     generate --library -l python -o bindings/python \
///     target/release/liblegalstream_uniffi.so
fn main() {
    uniffi::uniffi_bindgen_main();
}
