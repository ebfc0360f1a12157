use clap::Parser;
use huddle::config::Config;
use huddle::signaling::SignalingServer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("huddle={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr = config.bind_addr();

    println!("   Huddle Signaling Server");
    println!("   Binding to {}", bind_addr);
    println!("   Max {} participants per room", config.max_participants);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::new(&config);
    server.run(&bind_addr).await
}
