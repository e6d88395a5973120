/// Stepwise CLI
///
/// Runs and checks Stepwise programs from the command line.
use stepwise_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
