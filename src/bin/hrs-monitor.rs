use clap::Parser;
use log::{error, info};
use hrs_monitor::{init_logging, run, Args};
use hrs_monitor::error::AppRunError;

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!(concat!("HRS Monitor ", env!("CARGO_PKG_VERSION")));

    if let Err(err) = run(args).await {
        error!("Unexpected error: {}", err);
        return Err(err);
    }
    Ok(())
}
