use std::{env, error::Error};

fn main() -> Result<(), Box<dyn Error>> {
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::compile_protos("proto/service.proto")?;
    println!("cargo:rerun-if-changed=proto/service.proto");
    Ok(())
}
