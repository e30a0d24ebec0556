use pm5_telemetry::{
    ConnectionParams, Pipeline, Result, Source, SourceConfig, StreamConfig, Telemetry,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📊 PM5 Live Monitor");
    info!("Searching for PM5 devices...");

    let config = StreamConfig::default();
    let source =
        Source::from_config(SourceConfig::Live(ConnectionParams::default()), &config).await?;
    let pipeline = Pipeline::new(source, config);
    let stop = pipeline.stop_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, disconnecting...");
            stop.stop();
        }
    });

    let result = pipeline
        .run(|event| match &event.telemetry {
            Some(Telemetry::GeneralStatus(status)) => println!(
                "⏱  {:7.2} s  {:8.1} m  drag {:3}  {}",
                status.elapsed_secs(),
                status.distance_meters(),
                status.drag_factor,
                status.stroke_state
            ),
            Some(Telemetry::StrokeData(stroke)) => println!(
                "🚣 stroke {:4}  drive {:.2} m / {:.2} s  peak {:.1} lbs",
                stroke.stroke_count,
                stroke.drive_length_meters(),
                stroke.drive_time_secs(),
                stroke.peak_drive_force_lbs()
            ),
            _ => println!("{} {}", event.characteristic, event.data),
        })
        .await;

    match result {
        Ok(summary) => {
            info!("🎉 Session ended after {} packets", summary.packets);
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            warn!("Connection lost: {e}");
            Err(e)
        }
        Err(e) => {
            error!("❌ Streaming failed: {e}");
            Err(e)
        }
    }
}
