use activity_stress::config::{test_configuration_from_env, Settings};
use activity_stress::{TestSession, TestStatus};
use anyhow::Result;
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env();
    let config = test_configuration_from_env()?;

    info!("🚀 Activity stress runner starting...");
    if settings.executor.assume_rate_limited_on_network_failure {
        warn!("⚠️ Network failures will be counted as 429, rate limiting may be overcounted");
    }

    let mut session = TestSession::from_settings(&settings)?;
    let mut updates = session.subscribe();
    let run_id = session.start(config)?;
    info!("🧪 Started run {}", run_id);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                info!(
                    "📈 {:.0}% ({}/{}) {:.1} req/s, p95≈{} ms",
                    view.progress.progress_percent,
                    view.progress.current_requests,
                    view.progress.planned_requests,
                    view.progress.current_rps,
                    view.progress.live_p95
                );
                if view.status != TestStatus::Running {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("⏹️ Ctrl-C received, stopping after the current round");
                session.stop();
            }
        }
    }

    match session.wait().await {
        Some(result) => {
            info!(
                "✅ {} requests, {:.1}% success, {} rate limited",
                result.total_requests, result.success_rate_percent, result.rate_limited_requests
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        None => warn!("❌ Run ended without a result"),
    }

    Ok(())
}
