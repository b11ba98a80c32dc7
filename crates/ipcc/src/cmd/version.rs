use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ipcc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: ipcc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("IPCC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "protocol: magic={:#010x} version={}",
        ipcc_frame::MAGIC,
        ipcc_frame::VERSION
    );
    println!(
        "features: host={}, sim={}, cli=true",
        cfg!(feature = "host"),
        cfg!(feature = "sim"),
    );
    println!("transports: serial={}, sim=true", cfg!(unix));

    Ok(SUCCESS)
}
