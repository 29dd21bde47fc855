fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_files = ["proto/driver.proto", "proto/grpc_controller.proto"];

    // protox keeps the build free of a system `protoc`
    let descriptors = protox::compile(proto_files, ["proto"])?;
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(descriptors)?;

    for file in proto_files {
        println!("cargo:rerun-if-changed={file}");
    }
    Ok(())
}
