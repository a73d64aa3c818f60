use clap::Parser;

use toolchat::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    toolchat::init_tracing(cli.log_format, cli.log_stderr)?;

    if let Err(e) = cli::run(cli).await {
        tracing::error!(error = %e, "toolchat exited with an error");
        return Err(e);
    }
    Ok(())
}
