// Code generation for the StreamMetrics gRPC protocol

use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("proto");

    // protoc vendored: the build does not depend on a system-wide install
    env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known = protoc_bin_vendored::include_path()?;

    println!("cargo:rerun-if-changed=proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[proto_root.join("sentinel/v1/telemetry.proto")],
            &[proto_root, well_known],
        )?;
    Ok(())
}
