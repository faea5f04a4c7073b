use iabp_analyzer_service::{AppConfig, create_app};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing; JSON by default, `LOG_FORMAT=pretty` for development
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "iabp_analyzer_service=debug,iabp_session=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    info!("Loaded configuration: {:?}", config);

    if config.secret_api_key.is_none() {
        warn!("ANTHROPIC_API_KEY not set; sessions must supply their own API key");
    }
    if config.app_password.is_some() {
        info!("Password gate enabled");
    }

    let addr = config.socket_addr()?;
    let app = create_app(config)?;
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;

    info!("IABP Monitor Analyzer starting on {}", addr);
    info!("Health check endpoint: http://{}/_stcore/health", addr);
    info!("Analysis endpoint: POST http://{}/sessions/{{session_id}}/analyze", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
