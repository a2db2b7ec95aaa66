//! Per-volume analysis: the ROI mask, the built-in statistics, and the
//! registry that maps a configured choice name to a `VolumeAnalysis`
//! implementation. External analyses plug in by registering a factory
//! under their own name; there is no dynamic code loading.

pub mod builtin;
pub mod roi;

use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::ArrayView3;

use crate::prelude::{AnalysisResult, ScanError, ScanResult, VolumeAnalysis};
use crate::telemetry::LogManager;

pub use builtin::{AverageAnalysis, MedianAnalysis};
pub use roi::RoiMask;

pub const AVERAGE: &str = "average";
pub const MEDIAN: &str = "median";

/// Session inputs an analysis factory may need.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub mask_file: PathBuf,
    pub mask_is_weighted: bool,
    pub num_timepts: usize,
}

pub type AnalysisFactory =
    Box<dyn Fn(&AnalysisContext) -> ScanResult<Box<dyn VolumeAnalysis>> + Send + Sync>;

/// Explicit registration table for analysis implementations.
pub struct AnalysisRegistry {
    factories: HashMap<String, AnalysisFactory>,
}

impl AnalysisRegistry {
    /// Registry pre-populated with the built-in choices.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(AVERAGE, |ctx: &AnalysisContext| {
            let roi = RoiMask::from_file(&ctx.mask_file, ctx.mask_is_weighted)?;
            Ok(Box::new(AverageAnalysis::new(roi)) as Box<dyn VolumeAnalysis>)
        });
        registry.register(MEDIAN, |ctx: &AnalysisContext| {
            let roi = RoiMask::from_file(&ctx.mask_file, ctx.mask_is_weighted)?;
            Ok(Box::new(MedianAnalysis::new(roi)) as Box<dyn VolumeAnalysis>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&AnalysisContext) -> ScanResult<Box<dyn VolumeAnalysis>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn choices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn build(
        &self,
        choice: &str,
        context: &AnalysisContext,
    ) -> ScanResult<Box<dyn VolumeAnalysis>> {
        let factory = self
            .factories
            .get(choice)
            .ok_or_else(|| ScanError::UnknownAnalysis(choice.to_string()))?;
        factory(context)
    }
}

/// Owns the chosen analysis for a session and logs each invocation.
pub struct Analyzer {
    choice: String,
    analysis: Box<dyn VolumeAnalysis>,
    logger: LogManager,
}

impl Analyzer {
    pub fn new(
        registry: &AnalysisRegistry,
        choice: &str,
        context: &AnalysisContext,
    ) -> ScanResult<Self> {
        let analysis = registry.build(choice, context)?;
        Ok(Self {
            choice: choice.to_string(),
            analysis,
            logger: LogManager::new("analyzer"),
        })
    }

    pub fn choice(&self) -> &str {
        &self.choice
    }

    pub fn run(&mut self, vol: ArrayView3<'_, f64>, vol_idx: usize) -> ScanResult<AnalysisResult> {
        self.logger
            .record_debug(&format!("started volIdx {}", vol_idx));
        let result = self.analysis.compute(vol, vol_idx)?;
        self.logger.record(&format!("analyzed volIdx {}", vol_idx));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use serde_json::json;

    fn dummy_context() -> AnalysisContext {
        AnalysisContext {
            mask_file: PathBuf::new(),
            mask_is_weighted: false,
            num_timepts: 10,
        }
    }

    #[test]
    fn unknown_choice_is_rejected() {
        let registry = AnalysisRegistry::with_builtins();
        let err = registry.build("connectivity", &dummy_context()).unwrap_err();
        assert!(matches!(err, ScanError::UnknownAnalysis(_)));
    }

    #[test]
    fn builtins_are_pre_registered() {
        let registry = AnalysisRegistry::with_builtins();
        assert_eq!(registry.choices(), vec!["average", "median"]);
    }

    #[test]
    fn custom_analysis_registers_and_runs() {
        #[derive(Debug)]
        struct Fixed;
        impl VolumeAnalysis for Fixed {
            fn compute(
                &mut self,
                _vol: ArrayView3<'_, f64>,
                vol_idx: usize,
            ) -> ScanResult<AnalysisResult> {
                let mut result = AnalysisResult::new();
                result.insert("volIdx".into(), json!(vol_idx));
                Ok(result)
            }
        }

        let mut registry = AnalysisRegistry::with_builtins();
        registry.register("fixed", |_ctx| Ok(Box::new(Fixed) as Box<dyn VolumeAnalysis>));

        let mut analyzer = Analyzer::new(&registry, "fixed", &dummy_context()).unwrap();
        let vol = Array3::zeros((2, 2, 2));
        let result = analyzer.run(vol.view(), 7).unwrap();
        assert_eq!(result["volIdx"], json!(7));
        assert_eq!(analyzer.choice(), "fixed");
    }

    #[test]
    fn builtin_factory_loads_the_mask_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mask_path = dir.path().join("roi.nii.gz");
        let mask = Array3::from_elem((2, 2, 2), 1.0);
        crate::io::nifti::write_volume(&mask_path, &mask, &crate::math::AffineHelper::identity())
            .unwrap();

        let registry = AnalysisRegistry::with_builtins();
        let context = AnalysisContext {
            mask_file: mask_path,
            mask_is_weighted: false,
            num_timepts: 4,
        };
        let mut analyzer = Analyzer::new(&registry, AVERAGE, &context).unwrap();
        let vol = Array3::from_elem((2, 2, 2), 4.0);
        let result = analyzer.run(vol.view(), 0).unwrap();
        assert_eq!(result["average"], json!(4.0));
    }
}
