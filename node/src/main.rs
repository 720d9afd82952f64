#[tokio::main]
async fn main() -> anyhow::Result<()> {
    thermonode::host::run().await
}
