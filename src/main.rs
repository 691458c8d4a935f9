use clap::Parser;
use runway::api::{self, Cli};
use runway::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("Logging disabled: {e}");
    }

    if let Err(e) = api::run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
