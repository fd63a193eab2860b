use std::time::Duration;

use authgate::{app, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "authgate=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;
    let _sweeper = spawn_sweeper(app_state.clone());

    let app = app::build_app(app_state);
    app::serve(app).await
}

/// Periodic housekeeping: stale throttle counters and expired tokens are
/// reclaimed lazily on access anyway, this just bounds their storage.
fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(state.config.sessions.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.throttle.sweep();
            match state
                .store
                .delete_expired_tokens(time::OffsetDateTime::now_utc())
                .await
            {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "swept expired tokens"),
                Err(e) => tracing::error!(error = %e, "token sweep failed"),
            }
        }
    })
}
