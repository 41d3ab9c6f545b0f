use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;

use difyrelay::config::Config;
use difyrelay::gateway::GATEWAY_PATH;
use difyrelay::state::AppState;

/// WebSocket gateway relaying streamed answers from a Dify-style service.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Upstream base URL (overrides DIFY_BASE_URL)
    #[arg(long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "difyrelay=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream_base_url = upstream;
    }
    print_banner(&config);

    let state = AppState::new(&config);
    let shutdown = state.shutdown.clone();
    let app = difyrelay::routes::router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind");

    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ listening on 0.0.0.0:{actual_port}\x1b[0m");
    eprintln!();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, closing sessions");
                shutdown.cancel();
            }
        }
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .expect("server error");
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let timings = &config.timings;
    let allow_list = if config.allowed_ips.is_empty() {
        "open".to_string()
    } else {
        format!("{} address(es)", config.allowed_ips.len())
    };

    eprintln!();
    eprintln!("  \x1b[1;36mdifyrelay\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);
    eprintln!("  \x1b[2mgateway\x1b[0m      {GATEWAY_PATH}");
    eprintln!("  \x1b[2mupstream\x1b[0m     {}", config.upstream_base_url);
    eprintln!(
        "  \x1b[2mheartbeat\x1b[0m    {}s",
        timings.heartbeat_interval.as_secs()
    );
    eprintln!(
        "  \x1b[2mtimeouts\x1b[0m     receive {}s, upstream {}s",
        timings.receive_timeout.as_secs(),
        timings.upstream_timeout.as_secs()
    );
    eprintln!("  \x1b[2mallow-list\x1b[0m   {allow_list}");
    eprintln!();
}
