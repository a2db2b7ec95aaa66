//! Keyed store of per-volume analysis output. Written only by the
//! orchestrator thread, read by the results-server client thread; presence
//! of a key is the sole readiness signal.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::RwLock;

use serde_json::Value;

use crate::prelude::{AnalysisResult, ScanResult};

pub const FOUND_RESULTS_KEY: &str = "foundResults";

pub struct ResultsStore {
    inner: RwLock<HashMap<String, AnalysisResult>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert (or overwrite) the result mapping for one volume.
    pub fn insert(&self, vol_idx: usize, result: AnalysisResult) {
        self.inner
            .write()
            .unwrap()
            .insert(vol_idx.to_string(), result);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    /// Build the response mapping for a lookup: the stored keys plus
    /// `foundResults: true`, or exactly `{"foundResults": false}` when the
    /// volume has no result yet.
    pub fn lookup(&self, vol_idx: usize) -> AnalysisResult {
        let guard = self.inner.read().unwrap();
        match guard.get(&vol_idx.to_string()) {
            Some(stored) => {
                let mut response = stored.clone();
                response.insert(FOUND_RESULTS_KEY.into(), Value::Bool(true));
                response
            }
            None => {
                let mut response = AnalysisResult::new();
                response.insert(FOUND_RESULTS_KEY.into(), Value::Bool(false));
                response
            }
        }
    }

    /// Serialize every stored mapping, keyed by string volume index.
    pub fn save(&self, path: &Path) -> ScanResult<()> {
        let guard = self.inner.read().unwrap();
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer(file, &*guard)?;
        Ok(())
    }
}

impl Default for ResultsStore {
    fn default() -> Self {
        Self::new()
    }
}
