// Build script for generating gRPC code from the ML-Agents protobuf files
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = "proto";
    let proto_path = format!("{}/mlagents_envs/communicator_objects", proto_dir);

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", proto_path);

    // Fall back to the vendored protoc when none is configured
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let protos = [
        format!("{}/header.proto", proto_path),
        format!("{}/command.proto", proto_path),
        format!("{}/space_type.proto", proto_path),
        format!("{}/capabilities.proto", proto_path),
        format!("{}/observation.proto", proto_path),
        format!("{}/agent_info.proto", proto_path),
        format!("{}/agent_action.proto", proto_path),
        format!("{}/brain_parameters.proto", proto_path),
        format!("{}/unity_rl_input.proto", proto_path),
        format!("{}/unity_rl_output.proto", proto_path),
        format!("{}/unity_rl_initialization_input.proto", proto_path),
        format!("{}/unity_rl_initialization_output.proto", proto_path),
        format!("{}/unity_input.proto", proto_path),
        format!("{}/unity_output.proto", proto_path),
        format!("{}/unity_message.proto", proto_path),
        format!("{}/unity_to_external.proto", proto_path),
    ];

    // The client half is what a Unity player speaks; tests use it to stand in for one.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &[proto_dir])?;

    Ok(())
}
