fn main() -> Result<(), Box<dyn std::error::Error>> {
    let files = &["proto/rocket.proto"];
    let dirs = &["proto"];

    // Generated code must not depend on a protoc installed on the host.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_client(false)
        .build_server(true)
        .compile_protos(files, dirs)?;

    // recompile protobufs only if any of the proto files changes.
    for file in files {
        println!("cargo:rerun-if-changed={file}");
    }
    Ok(())
}
