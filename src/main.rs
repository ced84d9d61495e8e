use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    homelink::cli::run().await
}
