use anyhow::Context;
use scancore::analysis::AnalysisContext;
use scancore::receiver::ReceiverSettings;
use scancore::results::ResultsSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Session settings for one real-time run, loadable from YAML.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub scanner_host: String,
    pub scanner_port: u16,
    pub results_host: String,
    pub results_port: u16,
    pub max_pending_clients: usize,
    pub num_timepts: usize,
    pub mask_file: Option<PathBuf>,
    pub mask_is_weighted: bool,
    pub analysis: String,
    pub output_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scanner_host: "127.0.0.1".into(),
            scanner_port: 5555,
            results_host: "0.0.0.0".into(),
            results_port: 5556,
            max_pending_clients: 5,
            num_timepts: 30,
            mask_file: None,
            mask_is_weighted: false,
            analysis: scancore::analysis::AVERAGE.into(),
            output_dir: PathBuf::from("sessions"),
        }
    }
}

impl SessionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading session config {}", path_ref.display()))?;
        let config: SessionConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing session config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(num_timepts: usize, scanner_port: u16, results_port: u16) -> Self {
        Self {
            num_timepts,
            scanner_port,
            results_port,
            ..Self::default()
        }
    }

    pub fn receiver_settings(&self) -> ReceiverSettings {
        ReceiverSettings {
            bind_host: self.scanner_host.clone(),
            bind_port: self.scanner_port,
            num_timepts: self.num_timepts,
        }
    }

    pub fn results_settings(&self) -> ResultsSettings {
        ResultsSettings {
            bind_host: self.results_host.clone(),
            bind_port: self.results_port,
            max_pending_clients: self.max_pending_clients,
        }
    }

    pub fn analysis_context(&self) -> anyhow::Result<AnalysisContext> {
        let mask_file = self
            .mask_file
            .clone()
            .context("no mask file configured (set mask_file, or run with --simulate)")?;
        Ok(AnalysisContext {
            mask_file,
            mask_is_weighted: self.mask_is_weighted,
            num_timepts: self.num_timepts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_fills_the_core_settings() {
        let config = SessionConfig::from_args(60, 6000, 6001);
        assert_eq!(config.receiver_settings().num_timepts, 60);
        assert_eq!(config.receiver_settings().bind_port, 6000);
        assert_eq!(config.results_settings().bind_port, 6001);
        assert!(config.analysis_context().is_err());
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"num_timepts: 12\nscanner_port: 7100\nanalysis: median\nmask_file: roi.nii.gz\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.num_timepts, 12);
        assert_eq!(config.scanner_port, 7100);
        assert_eq!(config.analysis, "median");
        // unspecified keys keep their defaults
        assert_eq!(config.results_port, 5556);
        let context = config.analysis_context().unwrap();
        assert_eq!(context.mask_file, PathBuf::from("roi.nii.gz"));
    }
}
