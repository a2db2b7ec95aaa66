use anyhow::Context;
use clap::Parser;
use config::SessionConfig;
use generator::GeneratorConfig;
use runner::Orchestrator;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;

mod config;
mod generator;
mod runner;

#[derive(Parser)]
#[command(author, version, about = "Real-time scan session driver")]
struct Args {
    /// Load a session config from YAML (CLI value flags are ignored)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 30)]
    num_timepts: usize,
    #[arg(long, default_value_t = 5555)]
    scanner_port: u16,
    #[arg(long, default_value_t = 5556)]
    results_port: u16,
    /// ROI mask NIfTI file
    #[arg(long)]
    mask: Option<PathBuf>,
    /// Analysis choice (average, median, or a registered custom name)
    #[arg(long, default_value = "average")]
    analysis: String,
    /// Parent directory for per-session output
    #[arg(long, default_value = "sessions")]
    output: PathBuf,
    /// Stream a synthetic series into the receiver instead of waiting for
    /// a real scanner
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut session_config = match args.config {
        Some(path) => SessionConfig::load(path)?,
        None => {
            let mut config =
                SessionConfig::from_args(args.num_timepts, args.scanner_port, args.results_port);
            config.mask_file = args.mask;
            config.analysis = args.analysis;
            config.output_dir = args.output;
            config
        }
    };

    let output_dir = runner::create_output_dir(&session_config.output_dir)?;
    println!("Session output: {}", output_dir.display());

    let generator_config = if args.simulate {
        let generator_config = GeneratorConfig {
            num_timepts: session_config.num_timepts,
            pace: true,
            ..Default::default()
        };
        if session_config.mask_file.is_none() {
            let mask_path = output_dir.join("sim_mask.nii.gz");
            generator::write_uniform_mask(&mask_path, generator_config.shape)?;
            session_config.mask_file = Some(mask_path);
        }
        Some(generator_config)
    } else {
        None
    };

    let orchestrator =
        Orchestrator::new(session_config, output_dir).context("initializing session")?;

    // Ctrl-C trips the cancel flag; the volume loop notices at its next
    // wait slice and saves whatever has arrived.
    let cancel = orchestrator.cancel_flag();
    thread::spawn(move || {
        let runtime = TokioBuilder::new_current_thread().enable_all().build();
        if let Ok(runtime) = runtime {
            let _ = runtime.block_on(signal::ctrl_c());
            cancel.store(true, Ordering::SeqCst);
        }
    });

    if let Some(generator_config) = generator_config {
        let addr = orchestrator.scanner_addr();
        println!("Simulating a scanner against {}", addr);
        thread::spawn(move || {
            if let Err(err) = generator::stream_series(addr, &generator_config) {
                log::warn!("[simulator] streaming failed: {:#}", err);
            }
        });
    } else {
        println!(
            "Waiting for scanner on {}; results on {}",
            orchestrator.scanner_addr(),
            orchestrator.results_addr()
        );
    }

    let summary = orchestrator.run()?;
    println!(
        "Session complete -> volumes processed {}, received {}, results served {}, connection errors {}",
        summary.volumes_processed,
        summary.volumes_received,
        summary.results_served,
        summary.connection_errors
    );
    Ok(())
}
