//! Proximity Guard - operator console
//!
//! Reads ACTIVATE / DEACTIVATE from stdin and prints the system status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alerting::{spawn_dispatcher, Dispatcher};
use camera_capture::{FrameSourceFactory, MockBehavior, MockCameraFactory};
use chrono::Local;
use clap::Parser;
use guard::display::write_previews;
use guard::{init_logging, Guard, GuardConfig, GuardError, Status};
use proximity::{LocatorFactory, ScriptedLocator, ScriptedLocatorFactory, SeetaFaceFactory};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const SYSTEM_NAME: &str = "Spacial Defense System";
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "proximity-guard", version, about = "Camera proximity guard")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the synthetic camera and scripted face locator
    #[arg(long)]
    mock: bool,

    /// Mirror annotated frames into this image file
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = GuardConfig::load(args.config.as_deref())?;
    config.mock |= args.mock;
    if args.preview.is_some() {
        config.display.preview_path = args.preview;
    }
    init_logging(&config.logging)?;

    info!("=== Proximity Guard v{} ===", env!("CARGO_PKG_VERSION"));
    println!("Welcome to the {}", SYSTEM_NAME);
    println!("Current Date {}", Local::now().format("%Y-%m-%d"));
    println!();

    let dispatcher = Dispatcher::from_config(&config.alerts)?;
    let (alerts, dispatch_handle) = spawn_dispatcher(dispatcher, &config.alerts);

    let (sources, locators) = backends(&config)?;
    let preview = config.display.preview_path.clone();
    let preview_interval = Duration::from_millis(config.display.preview_interval_ms);

    let (mut guard, mut events) = Guard::new(config, sources, locators, alerts);
    if let Some(path) = preview {
        info!("Writing previews to {}", path.display());
        tokio::spawn(write_previews(guard.subscribe_display(), path, preview_interval));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut shown = guard.status();
    print_status(shown);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    guard.handle_input(&line);
                }
                Ok(None) => {
                    info!("Input closed; waiting for Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    stdin_open = false;
                }
            },
            Some(event) = events.recv() => {
                guard.handle_event(&event);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        if guard.status() != shown {
            shown = guard.status();
            print_status(shown);
        }
    }

    guard.shutdown().await;
    match tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, dispatch_handle).await {
        Ok(stats) => {
            let stats = stats?;
            info!(
                "Alerts: {} delivered, {} failed, {} throttled",
                stats.delivered, stats.failed, stats.throttled
            );
        }
        Err(_) => warn!("Alert dispatcher did not drain in time; pending alerts dropped"),
    }
    Ok(())
}

fn print_status(status: Status) {
    println!("SYSTEM STATUS: {}", status);
}

type Backends = (Arc<dyn FrameSourceFactory>, Arc<dyn LocatorFactory>);

fn backends(config: &GuardConfig) -> Result<Backends, GuardError> {
    if config.mock {
        info!("Mock mode: synthetic camera, scripted faces");
        let behavior = MockBehavior {
            paced: true,
            ..Default::default()
        };
        let script = ScriptedLocator::approaching(config.camera.width, config.camera.height, 40);
        let sources: Arc<dyn FrameSourceFactory> = Arc::new(MockCameraFactory::new(behavior));
        let locators: Arc<dyn LocatorFactory> = Arc::new(ScriptedLocatorFactory::new(script));
        return Ok((sources, locators));
    }

    let model_path = config.proximity.model_path.clone().ok_or_else(|| {
        GuardError::Config("proximity.model_path is required unless running with --mock".into())
    })?;
    let locators: Arc<dyn LocatorFactory> = Arc::new(SeetaFaceFactory::new(
        model_path,
        config.proximity.score_threshold,
    ));
    Ok((camera_backend()?, locators))
}

#[cfg(feature = "native")]
fn camera_backend() -> Result<Arc<dyn FrameSourceFactory>, GuardError> {
    Ok(Arc::new(camera_capture::NativeCameraFactory))
}

#[cfg(not(feature = "native"))]
fn camera_backend() -> Result<Arc<dyn FrameSourceFactory>, GuardError> {
    Err(GuardError::Config(
        "built without camera support; rebuild with --features native or use --mock".into(),
    ))
}
