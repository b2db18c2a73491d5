fn main() {
    println!("cargo:rerun-if-changed=proto/Mumble.proto");

    protobuf_codegen_pure::Codegen::new()
        .out_dir("src/proto")
        .inputs(["proto/Mumble.proto"])
        .include("proto")
        .run()
        .expect("codegen for Mumble.proto");
}
