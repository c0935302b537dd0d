fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    // The service is described in Rust rather than a .proto file so the build
    // does not depend on a system protoc. Message types live in src/grpc/proto.rs.
    let throttle_service = tonic_build::manual::Service::builder()
        .name("ThrottleService")
        .package("tollgate.v1")
        .method(
            tonic_build::manual::Method::builder()
                .name("check")
                .route_name("Check")
                .input_type("crate::grpc::proto::CheckRequest")
                .output_type("crate::grpc::proto::CheckResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new()
        .build_server(true)
        .build_client(false)
        .compile(&[throttle_service]);

    Ok(())
}
