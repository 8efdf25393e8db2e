#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = scriptgrade::run().await {
        eprintln!("scriptgrade fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
