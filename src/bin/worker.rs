#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = scriptgrade::run_worker().await {
        eprintln!("scriptgrade-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
