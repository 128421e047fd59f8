use clap::Parser;
use crmtap::cmd::{run, Cli};
use crmtap::log::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    run(cli).await?;
    Ok(())
}
