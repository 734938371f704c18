//! Inpaint server
//!
//! HTTP service for point-prompted object removal, prompted fill and
//! background replacement.

#[cfg(feature = "cli")]
use inpaint_server::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
