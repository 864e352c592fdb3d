use minitcp::cli::initialize_from_arguments;
use std::process::ExitCode;

/// Runs the echo demonstration described by the command line
#[tokio::main]
async fn main() -> ExitCode {
    println!("minitcp v{}", env!("CARGO_PKG_VERSION"));
    if initialize_from_arguments().await {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
