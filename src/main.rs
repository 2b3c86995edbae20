#[tokio::main]
async fn main() -> anyhow::Result<()> {
    campaign_translate::run().await
}
