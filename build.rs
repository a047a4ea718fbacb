//! Build script for proto compilation.
//!
//! The generated code is committed under `src/generated/`, so building the
//! SDK does not require `protoc`. This script only regenerates the types
//! when the `regenerate-proto` feature is enabled.
//!
//! To regenerate: `cargo build --features regenerate-proto`

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only regenerate if the feature is enabled
    #[cfg(feature = "regenerate-proto")]
    {
        let out_dir = std::path::PathBuf::from("src/generated");
        tonic_prost_build::configure()
            .build_client(false)
            .out_dir(&out_dir)
            .compile_protos(
                &[
                    "proto/tfplugin6.proto",
                    "proto/grpc_controller.proto",
                    "proto/grpc_stdio.proto",
                    "proto/health.proto",
                ],
                &["proto"],
            )?;

        // The health package generates under its proto package name
        let generated = out_dir.join("grpc.health.v1.rs");
        let target = out_dir.join("health.rs");
        if generated.exists() {
            std::fs::rename(generated, target)?;
        }
    }

    // Always rerun if a proto changes
    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
