use std::sync::Arc;

use aerosync_server::configs::Settings;
use aerosync_server::run;

#[tokio::main]
async fn main() {
    let settings = Arc::new(Settings::new().expect("Failed to load settings."));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            tracing_subscriber::EnvFilter::new(format!("{app_name}={level},rumqttc=warn"))
        }))
        .init();

    if let Err(err) = run(&settings).await {
        tracing::error!("fatal: {err}");
        std::process::exit(1);
    }
}
