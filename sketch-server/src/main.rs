use log::info;
use sketch_collab::SketchServer;

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting sketch server...");

    let server = SketchServer::with_defaults();
    if let Err(e) = server.run().await {
        log::error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
