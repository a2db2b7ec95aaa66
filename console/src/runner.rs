//! Session orchestration: owns both socket servers, drives the strict
//! in-order volume loop (receive -> preprocess -> analyze -> publish), and
//! archives the session output when the scan completes or is cancelled.

use anyhow::Context;
use scancore::analysis::{Analyzer, AnalysisRegistry};
use scancore::preprocessing::Preprocessor;
use scancore::receiver::ScanReceiver;
use scancore::results::ResultsServer;
use scancore::telemetry::LogManager;
use scancore::ScanError;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SessionConfig;

const VOLUME_WAIT_SLICE: Duration = Duration::from_millis(100);
const MOTION_WARN_MM: f64 = 1.5;

pub const RESULTS_FILE: &str = "results.json";
pub const SERIES_FILE: &str = "received_func.nii.gz";

/// End-of-session accounting reported to the operator.
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub volumes_processed: usize,
    pub volumes_received: usize,
    pub results_served: usize,
    pub connection_errors: usize,
}

pub struct Orchestrator {
    config: SessionConfig,
    output_dir: PathBuf,
    receiver: ScanReceiver,
    results: ResultsServer,
    preprocessor: Preprocessor,
    analyzer: Analyzer,
    cancel: Arc<AtomicBool>,
    logger: LogManager,
}

impl Orchestrator {
    /// Start both servers and build the session pipeline. Bind or mask
    /// failures surface here, before any volume can arrive.
    pub fn new(config: SessionConfig, output_dir: PathBuf) -> anyhow::Result<Self> {
        let receiver =
            ScanReceiver::start(config.receiver_settings()).context("starting scan receiver")?;
        let results =
            ResultsServer::start(config.results_settings()).context("starting results server")?;

        let registry = AnalysisRegistry::with_builtins();
        let analysis_context = config.analysis_context()?;
        let analyzer = Analyzer::new(&registry, &config.analysis, &analysis_context)
            .with_context(|| format!("setting up {:?} analysis", config.analysis))?;

        Ok(Self {
            config,
            output_dir,
            receiver,
            results,
            preprocessor: Preprocessor::new(),
            analyzer,
            cancel: Arc::new(AtomicBool::new(false)),
            logger: LogManager::new("orchestrator"),
        })
    }

    /// Address of the scanner-facing socket (resolves port 0).
    pub fn scanner_addr(&self) -> SocketAddr {
        self.receiver.local_addr()
    }

    /// Address of the client-facing results socket.
    pub fn results_addr(&self) -> SocketAddr {
        self.results.local_addr()
    }

    /// Flag that aborts the volume loop at the next wait slice.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the session to completion (or cancellation), then save and shut
    /// everything down.
    pub fn run(mut self) -> anyhow::Result<SessionSummary> {
        let total = self.config.num_timepts;
        self.logger.record(&format!(
            "session started: {} timepoints, {} analysis",
            total,
            self.analyzer.choice()
        ));

        // the first volume fixes the series format
        loop {
            if self.receiver.wait_for_volume(0, VOLUME_WAIT_SLICE) {
                break;
            }
            if self.cancel.load(Ordering::SeqCst) {
                self.logger
                    .record_warn("session cancelled before the first volume arrived");
                return self.finish(0);
            }
        }
        let format = self
            .receiver
            .get_format()
            .context("series format missing after the first volume")?;
        self.preprocessor.set_affine(&format.affine);
        let tr_budget = Duration::from_millis(format.tr.max(0.0) as u64);
        self.logger.record(&format!(
            "scan started: shape {:?}, dtype {}, TR {} ms",
            format.shape, format.dtype, format.tr
        ));

        let mut processed = 0;
        'volumes: for vol_idx in 0..total {
            while !self.receiver.wait_for_volume(vol_idx, VOLUME_WAIT_SLICE) {
                if self.cancel.load(Ordering::SeqCst) {
                    self.logger
                        .record_warn(&format!("session cancelled at volIdx {}", vol_idx));
                    break 'volumes;
                }
            }
            let started = Instant::now();

            let vol = self.receiver.get_volume(vol_idx).with_context(|| {
                format!("volIdx {} flagged complete but unavailable", vol_idx)
            })?;

            if let Some(metrics) = self.preprocessor.run(&vol.view(), vol_idx) {
                if metrics.displacement > MOTION_WARN_MM {
                    self.logger.record_warn(&format!(
                        "volIdx {} moved {:.2} mm from reference",
                        vol_idx, metrics.displacement
                    ));
                }
            }

            let result = self
                .analyzer
                .run(vol.view(), vol_idx)
                .with_context(|| format!("analyzing volIdx {}", vol_idx))?;
            self.results.update_results(vol_idx, result);
            processed += 1;

            let elapsed = started.elapsed();
            if !tr_budget.is_zero() && elapsed > tr_budget {
                self.logger.record_warn(&format!(
                    "volIdx {} took {} ms, over the {} ms TR",
                    vol_idx,
                    elapsed.as_millis(),
                    tr_budget.as_millis()
                ));
            }
        }

        self.finish(processed)
    }

    fn finish(mut self, processed: usize) -> anyhow::Result<SessionSummary> {
        let results_path = self.output_dir.join(RESULTS_FILE);
        self.results
            .save_results(&results_path)
            .context("saving results mapping")?;
        self.logger
            .record(&format!("results saved to {}", results_path.display()));

        let series_path = self.output_dir.join(SERIES_FILE);
        match self.receiver.save_series(&series_path) {
            Ok(()) => self
                .logger
                .record(&format!("series archived to {}", series_path.display())),
            Err(ScanError::SeriesUnavailable(_)) => self
                .logger
                .record_warn("no volumes received; skipping series archive"),
            Err(err) => return Err(err).context("archiving received series"),
        }

        let receiver_metrics = self.receiver.metrics();
        let results_metrics = self.results.metrics();
        self.receiver.shutdown();
        self.results.shutdown();

        Ok(SessionSummary {
            volumes_processed: processed,
            volumes_received: receiver_metrics.volumes_received,
            results_served: results_metrics.results_served,
            connection_errors: receiver_metrics.connection_errors
                + results_metrics.connection_errors,
        })
    }
}

/// Create the next sequentially numbered output directory (`scan_001`,
/// `scan_002`, ...) under the configured parent.
pub fn create_output_dir(parent: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(parent)
        .with_context(|| format!("creating output parent {}", parent.display()))?;

    let mut highest = 0u32;
    for entry in fs::read_dir(parent)? {
        let name = entry?.file_name();
        if let Some(suffix) = name.to_string_lossy().strip_prefix("scan_") {
            if let Ok(number) = suffix.parse::<u32>() {
                highest = highest.max(number);
            }
        }
    }

    let output_dir = parent.join(format!("scan_{:03}", highest + 1));
    fs::create_dir(&output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;
    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{self, GeneratorConfig};
    use scancore::math::StatsHelper;
    use std::thread;

    #[test]
    fn output_dirs_are_numbered_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let first = create_output_dir(dir.path()).unwrap();
        let second = create_output_dir(dir.path()).unwrap();
        assert!(first.ends_with("scan_001"));
        assert!(second.ends_with("scan_002"));
    }

    #[test]
    fn session_processes_a_synthetic_series_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mask_path = dir.path().join("mask.nii.gz");
        generator::write_uniform_mask(&mask_path, [4, 4, 2]).unwrap();

        let config = SessionConfig {
            scanner_host: "127.0.0.1".into(),
            scanner_port: 0,
            results_host: "127.0.0.1".into(),
            results_port: 0,
            num_timepts: 3,
            mask_file: Some(mask_path),
            output_dir: dir.path().to_path_buf(),
            ..SessionConfig::default()
        };
        let output_dir = create_output_dir(&config.output_dir).unwrap();
        let orchestrator = Orchestrator::new(config, output_dir.clone()).unwrap();

        let generator_config = GeneratorConfig {
            shape: [4, 4, 2],
            num_timepts: 3,
            ..Default::default()
        };
        let addr = orchestrator.scanner_addr();
        let sender_config = generator_config.clone();
        let sender = thread::spawn(move || generator::stream_series(addr, &sender_config));

        let summary = orchestrator.run().unwrap();
        assert_eq!(sender.join().unwrap().unwrap(), 3);
        assert_eq!(summary.volumes_processed, 3);
        assert_eq!(summary.volumes_received, 3);

        // the results file carries the deterministic per-volume averages
        let text = fs::read_to_string(output_dir.join(RESULTS_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let series = generator::build_series(&generator_config).unwrap();
        for vol_idx in 0..3 {
            let samples: Vec<f64> = series[vol_idx].iter().copied().collect();
            let expected = StatsHelper::round2(StatsHelper::mean(&samples));
            assert_eq!(
                parsed[vol_idx.to_string()]["average"].as_f64().unwrap(),
                expected
            );
        }
        assert!(output_dir.join(SERIES_FILE).exists());
    }

    #[test]
    fn missing_mask_fails_before_serving() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            scanner_port: 0,
            results_port: 0,
            mask_file: None,
            ..SessionConfig::default()
        };
        assert!(Orchestrator::new(config, dir.path().to_path_buf()).is_err());
    }
}
