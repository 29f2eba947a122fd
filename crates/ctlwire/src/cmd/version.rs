use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ctlwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: ctlwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CTLWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "frame: size={} data={} params={}",
        ctlwire_frame::FRAME_SIZE,
        ctlwire_frame::DATA_SIZE,
        ctlwire_frame::PARAM_COUNT
    );
    println!("features: conn={}, cli=true", cfg!(feature = "conn"));

    Ok(SUCCESS)
}
