use hk_engine::{Result, cli};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(err) = cli::run().await {
        clx::progress::stop();
        return Err(err);
    }
    clx::progress::stop();
    Ok(())
}
