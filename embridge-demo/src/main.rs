use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use embridge::prelude::*;
use embridge::sim::{SimEngine, SimMessenger, SimRegistrar, SimView};

/// Drives the bridge and run loop against the in-process engine
#[derive(Parser, Debug)]
#[command(name = "embridge-demo")]
#[command(version)]
struct Args {
    /// Number of frames to run before the view shuts down
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Frame rate the view reports
    #[arg(long, default_value_t = 60.0)]
    fps: f32,

    /// Run loop configuration (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let result = load_config(&args).and_then(|config| run(&args, config));

    if let Err(err) = result {
        eprintln!("embridge demo failed: {}", err);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<RunLoopConfig> {
    let config = match &args.config {
        Some(path) => RunLoopConfig::load(path)?,
        None => RunLoopConfig::default(),
    };
    config.init_logger();
    Ok(config)
}

fn run(args: &Args, config: RunLoopConfig) -> Result<()> {
    let messenger = Arc::new(SimMessenger::new());
    let registrar = SimRegistrar::new();
    let bridge = Bridge::new();
    let mut engine = SimEngine::new(messenger.clone());
    let mut view = SimView::new(args.frames, args.fps);

    bridge.set_engine_view(&mut engine, view.as_raw());

    let connection = bridge.set_message_handler(
        &messenger,
        "ping",
        Some(|data: Option<&[u8]>| {
            debug!("ping with {} bytes", data.map_or(0, <[u8]>::len));
            Some(b"pong".to_vec())
        }),
    )?;
    info!("answering 'ping' on connection {}", connection);

    bridge.set_destruction_handler(&registrar, |registrar: RegistrarRef| {
        info!("{:?} torn down", registrar);
    });

    bridge.send_with_reply(
        &*messenger,
        "echo",
        b"hello engine",
        Some(|reply: Option<&[u8]>| {
            let reply = reply.map(String::from_utf8_lossy);
            info!("echo replied {:?}", reply);
        }),
    )?;
    let pending = bridge.request(&*messenger, "echo", b"second")?;

    let mut frame = 0u64;
    let stats = RunLoop::new(config).run(&mut engine, &mut view, &mut || {
        frame += 1;
        if frame % 30 == 0 {
            messenger.post("ping", &frame.to_le_bytes());
        }
    });

    info!(
        "{} iterations, {:?} asleep, {} responses sent",
        stats.iterations,
        stats.total_wait,
        messenger.responses().len()
    );

    match pending.try_recv() {
        Ok(reply) => info!("request resolved with {:?}", reply),
        Err(err) => warn!("request still pending: {}", err),
    }

    registrar.destroy();

    Ok(())
}
