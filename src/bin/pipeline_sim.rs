// crabsurface pipeline simulator
// Drives capture, render and encode against the simulated backend until Ctrl-C

use anyhow::{bail, Context, Result};
use crabsurface::capture::DeviceManager;
use crabsurface::recording::{EncoderFactory, MuxerFactory};
use crabsurface::render::{BouncingBall, HostSurface};
use crabsurface::testing::{SimDeviceManager, SimEncoderFactory, SimGpu, SimHostSurface, SimMuxerFactory};
use crabsurface::{LoggingHost, MachineState, Pipeline, PipelineConfig, PipelineDeps, Size};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

struct Options {
    config: Option<PathBuf>,
    seconds: Option<u64>,
    record_every: u64,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        config: None,
        seconds: None,
        record_every: 3,
        json: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                options.config = Some(PathBuf::from(&args[i + 1]));
                i += 1;
            }
            "--seconds" if i + 1 < args.len() => {
                options.seconds = Some(args[i + 1].parse().context("--seconds expects a number")?);
                i += 1;
            }
            "--record-every" if i + 1 < args.len() => {
                options.record_every = args[i + 1].parse().context("--record-every expects a number")?;
                i += 1;
            }
            "--json" => options.json = true,
            other => bail!(
                "Unknown argument: {}\nUsage: pipeline-sim [--config <path>] [--seconds <n>] [--record-every <n>] [--json]",
                other
            ),
        }
        i += 1;
    }

    Ok(options)
}

fn main() -> Result<()> {
    crabsurface::init_logging();

    let args: Vec<String> = env::args().collect();
    let options = parse_args(&args)?;

    let config = match options.config.as_ref() {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::load_or_default(),
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    let gpu = Arc::new(SimGpu::new());
    let devices: Arc<dyn DeviceManager> = Arc::new(SimDeviceManager::single_back_camera());
    let encoders: Arc<dyn EncoderFactory> = Arc::new(SimEncoderFactory::new(gpu.clone()));
    let muxers: Arc<dyn MuxerFactory> = Arc::new(SimMuxerFactory::new());
    let output_path = config.encode.output_path();

    let pipeline = Pipeline::new(
        config,
        PipelineDeps {
            devices,
            gpu: gpu.clone(),
            encoders,
            muxers,
            host: Arc::new(LoggingHost),
            on_active_changed: Some(Arc::new(|active: bool| {
                log::info!("Record button: {}", if active { "stop" } else { "record" });
            })),
        },
    )?;

    let surface = Arc::new(SimHostSurface::with_size(Size::new(1280, 720)));
    let host_surface: Arc<dyn HostSurface> = surface.clone();
    pipeline.create(host_surface, Arc::new(BouncingBall::new()));
    pipeline.resume();

    let vsync_surface = surface.clone();
    let vsync_flag = running.clone();
    let vsync = thread::Builder::new()
        .name("crabsurface-vsync".to_string())
        .spawn(move || {
            while vsync_flag.load(Ordering::SeqCst) {
                vsync_surface.vsync();
                thread::sleep(FRAME_INTERVAL);
            }
        })
        .context("spawning vsync thread")?;

    println!("crabsurface {} pipeline simulator, Ctrl-C to stop", crabsurface::VERSION);

    let started = Instant::now();
    let mut last_toggle = Instant::now();
    while running.load(Ordering::SeqCst) {
        if options.seconds.is_some_and(|limit| started.elapsed() >= Duration::from_secs(limit)) {
            break;
        }
        if options.record_every > 0 && last_toggle.elapsed() >= Duration::from_secs(options.record_every) {
            pipeline.toggle_record();
            last_toggle = Instant::now();
        }
        thread::sleep(Duration::from_millis(50));
    }

    running.store(false, Ordering::SeqCst);
    if vsync.join().is_err() {
        log::error!("vsync thread panicked");
    }

    let summary = serde_json::json!({
        "info": crabsurface::get_info(),
        "elapsed_secs": started.elapsed().as_secs_f64(),
        "render": pipeline.render_state().phase(),
        "capture": pipeline.capture_state().phase(),
        "encode": pipeline.encode_state().phase(),
        "frames_swapped": surface.swaps(),
        "encoder_frames": gpu.swap_count(),
        "output": output_path,
    });

    pipeline.shutdown(Duration::from_secs(2))?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Stopped after {:.1}s: {} frames on screen, output {}",
            started.elapsed().as_secs_f64(),
            surface.swaps(),
            output_path.display()
        );
    }

    Ok(())
}
