/// Builds the gRPC client and server code for the `points.proto` definition
/// using `tonic-prost-build`.
///
/// The generated module exposes both the `PointServer` client and server
/// halves together with the request/response messages. A file descriptor set
/// is written next to the generated code so the points server can register it
/// with `tonic-reflection`.
///
/// # Files and Paths
///
/// - Proto file: `proto/points.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("points");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("points_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/points.proto");

    tonic_prost_build::configure()
        .file_descriptor_set_path(&descriptor_path)
        .compile_protos(&["proto/points.proto"], &["proto"])
        .unwrap();
}
