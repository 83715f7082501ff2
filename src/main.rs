use lead_capture_server::app;

#[tokio::main]
async fn main() {
    app::run().await;
}
