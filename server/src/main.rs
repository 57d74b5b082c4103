#[tokio::main]
async fn main() {
    if let Err(err) = livechat_server::run().await {
        eprintln!("live chat server failed: {err}");
        std::process::exit(1);
    }
}
