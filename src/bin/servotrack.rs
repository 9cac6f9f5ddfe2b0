use anyhow::{ensure, Context};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use servotrack::source::{spawn_pump, FrameSource, JsonLinesSource, SweepSource};
use servotrack::{logging, open_actuator, AngleUpdate, Config, ControlLoop, TrackingController};

#[derive(Parser)]
#[command(
    name = "servotrack",
    about = "Pan a servo to follow the largest detected target",
    version
)]
struct Args {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detections to replay, one JSON frame per line ("-" for stdin).
    /// Without it a synthetic target sweeps across the frame.
    #[arg(short, long)]
    detections: Option<PathBuf>,

    /// Frames per second fed to the control loop
    #[arg(long, default_value_t = 33.0)]
    fps: f64,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Never touch the PWM hardware
    #[arg(long)]
    simulate: bool,

    /// Write every angle update to this file as JSON lines
    #[arg(long)]
    log_updates: Option<PathBuf>,

    /// Frame width of the synthetic sweep
    #[arg(long, default_value_t = 640)]
    width: i32,

    /// Frame height of the synthetic sweep
    #[arg(long, default_value_t = 480)]
    height: i32,
}

fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let args = Args::parse();
    ensure!(args.fps > 0.0 && args.fps.is_finite(), "--fps must be positive");

    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if args.simulate {
        cfg.actuator.simulate = true;
    }
    cfg.validate()?;

    let actuator = open_actuator(&cfg.actuator, cfg.servo.center_angle)?;
    info!("Using {:?} servo", actuator.kind());
    let controller = TrackingController::new(cfg.servo.clone(), actuator)?;
    let mut control = ControlLoop::new(controller, cfg.control.clone());

    let mut log_writer = match &args.log_updates {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };
    let mut updates = control.subscribe();
    let observer = thread::Builder::new()
        .name("servotrack-observer".into())
        .spawn(move || -> io::Result<Option<AngleUpdate>> {
            let mut last = None;
            loop {
                match updates.blocking_recv() {
                    Ok(update) => {
                        if let Some(writer) = log_writer.as_mut() {
                            serde_json::to_writer(&mut *writer, &update)?;
                            writer.write_all(b"\n")?;
                        }
                        last = Some(update);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Observer skipped {} updates", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
            if let Some(writer) = log_writer.as_mut() {
                writer.flush()?;
            }
            Ok(last)
        })?;

    let source: Box<dyn FrameSource + Send> = match &args.detections {
        Some(path) if path.as_os_str() == "-" => Box::new(JsonLinesSource::new(BufReader::new(io::stdin()))),
        Some(path) => Box::new(JsonLinesSource::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        ))),
        None => Box::new(SweepSource::new(args.width, args.height, 80, 12).with_gap_every(25)),
    };

    let frames = control.start()?;
    let period = Duration::from_secs_f64(1.0 / args.fps);
    let producer = spawn_pump(source, frames, period, args.max_frames)?;

    let produced = producer
        .join()
        .map_err(|_| anyhow::anyhow!("frame producer panicked"))?;
    // The producer dropped its sender; the worker recenters and exits.
    let result = control.wait();
    drop(control);

    let last = observer
        .join()
        .map_err(|_| anyhow::anyhow!("observer panicked"))??;
    result?;
    let sent = produced?;

    match last {
        Some(update) => info!("Sent {} frames, final angle {:.1}° after {} updates", sent, update.angle, update.seq),
        None => info!("Sent {} frames, no updates observed", sent),
    }
    Ok(())
}
