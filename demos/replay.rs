use pm5_telemetry::{parse_fixture, Pipeline, Result, Source, SourceConfig, StreamConfig};
use tracing::{error, info};

const DEFAULT_SESSION: &str = include_str!("../fixtures/recorded_rowing_data.json");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    info!("🚣 PM5 Recorded Session Replay");

    // Replay a session file if one is given, otherwise the bundled recording
    let records = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading session from {path}");
            parse_fixture(&std::fs::read_to_string(path)?)?
        }
        None => parse_fixture(DEFAULT_SESSION)?,
    };

    let config = StreamConfig {
        replay_interval_ms: 250,
        ..StreamConfig::default()
    };
    let source = Source::from_config(SourceConfig::Recorded(records), &config).await?;
    let pipeline = Pipeline::new(source, config);
    let stop = pipeline.stop_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping replay...");
            stop.stop();
        }
    });

    let summary = pipeline
        .run(|event| match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to format event: {e}"),
        })
        .await?;

    info!(
        "✅ Replayed {} packets ({} decoded) from {}",
        summary.packets, summary.decoded, summary.device_address
    );
    Ok(())
}
