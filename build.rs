fn main() {
    // Optional build-dependency: only touch prost_build when the `rpc`
    // feature actually pulled it in, so `--no-default-features` builds don't
    // need a protoc toolchain at all.
    if std::env::var_os("CARGO_FEATURE_RPC").is_some() {
        println!("cargo:rerun-if-changed=proto/frame.proto");
        prost_build::compile_protos(&["proto/frame.proto"], &["proto/"])
            .expect("failed to compile proto/frame.proto");
    }
}
