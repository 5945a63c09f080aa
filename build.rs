fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    // Server stubs only
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(
            &["proto/v1beta1/api.proto", "proto/v2/api.proto"],
            &["proto"],
        )?;

    Ok(())
}
