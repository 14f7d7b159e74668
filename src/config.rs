//! Pipeline configuration, read from TOML.
//!
//! ```toml
//! country = "Ethiopia"
//! output_dir = "out"
//! exchange_rates = "exchange_rates.csv"
//!
//! [[simulation]]
//! folder = "sim/goats_pastoral"
//! prefix = "ahle_goat_pastoral"
//! species = "Goat"
//! production_system = "Pastoral"
//! year = 2021
//!
//! [attribution]
//! proportions = "attribution.csv"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::attribution::{default_mappings, AttributionSettings, SpeciesMapping};
use crate::differencer::INDIVIDUAL_IDEALS;
use crate::error::AhleError;
use crate::external::ExternalAttribution;
use crate::moments::Z95;
use crate::store::scenario;

fn default_country() -> String {
    "Ethiopia".to_string()
}

fn default_region() -> String {
    "National".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

fn default_scenarios() -> Vec<String> {
    let mut s: Vec<String> = [
        scenario::CURRENT,
        scenario::IDEAL,
        scenario::MORTALITY_ZERO,
        scenario::PPR,
        scenario::BRUC,
        scenario::FMD,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    s.extend(default_partial_scenarios());
    s
}

fn default_partial_scenarios() -> Vec<String> {
    INDIVIDUAL_IDEALS
        .iter()
        .chain(&["ideal_a", "ideal_j", "ideal_n"])
        .chain(&[
            "mortality_zero_af",
            "mortality_zero_am",
            "mortality_zero_j",
            "mortality_zero_n",
            "mortality_zero_a",
        ])
        .map(|s| s.to_string())
        .collect()
}

/// One simulator run: a folder of `{prefix}_{scenario}.csv` files.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSource {
    pub folder: PathBuf,
    pub prefix: String,
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<String>,
    pub species: String,
    pub production_system: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub year: i32,
}

/// A pre-combined wide table. Segment columns present in the file win over
/// the fallbacks given here.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedSource {
    pub path: PathBuf,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub production_system: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    /// Wide tables written by the simulator already carry costs as negatives.
    #[serde(default = "default_true")]
    pub costs_negated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Where cause proportions come from: a ready CSV or the external program.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    #[serde(default)]
    pub proportions: Option<PathBuf>,
    #[serde(default)]
    pub external: Option<ExternalAttribution>,
    #[serde(default = "default_mappings")]
    pub mappings: Vec<SpeciesMapping>,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            proportions: None,
            external: None,
            mappings: default_mappings(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Constants {
    pub known_disease_coverage: f64,
    /// Relative tolerance for sum and proportion checks.
    pub tolerance: f64,
    pub z: f64,
}

impl Default for Constants {
    fn default() -> Self {
        let s = AttributionSettings::default();
        Self {
            known_disease_coverage: s.known_disease_coverage,
            tolerance: s.tolerance,
            z: Z95,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub simulation: Vec<SimulationSource>,
    #[serde(default)]
    pub combined: Vec<CombinedSource>,
    #[serde(default)]
    pub attribution: AttributionConfig,
    /// `country, year, rate` CSV. Without it no USD columns are produced.
    #[serde(default)]
    pub exchange_rates: Option<PathBuf>,
    #[serde(default)]
    pub constants: Constants,
    #[serde(default = "default_partial_scenarios")]
    pub partial_scenarios: Vec<String>,
    /// Label of an extra all-regions roll-up; off when absent.
    #[serde(default)]
    pub region_rollup: Option<String>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, AhleError> {
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    /// Parse and validate without touching paths.
    pub fn from_toml(text: &str) -> Result<Self, AhleError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AhleError> {
        if self.simulation.is_empty() && self.combined.is_empty() {
            return Err(AhleError::Config(
                "no [[simulation]] or [[combined]] sources configured".into(),
            ));
        }
        if self.attribution.proportions.is_some() && self.attribution.external.is_some() {
            return Err(AhleError::Config(
                "attribution.proportions and attribution.external are mutually exclusive".into(),
            ));
        }
        let c = &self.constants;
        if !(c.known_disease_coverage > 0.0 && c.known_disease_coverage <= 1.0) {
            return Err(AhleError::Config(format!(
                "known_disease_coverage must be in (0, 1], got {}",
                c.known_disease_coverage
            )));
        }
        if !(c.tolerance >= 0.0) || !(c.z > 0.0) {
            return Err(AhleError::Config("tolerance must be >= 0 and z > 0".into()));
        }
        Ok(())
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.output_dir);
        for s in &mut self.simulation {
            join(&mut s.folder);
        }
        for c in &mut self.combined {
            join(&mut c.path);
        }
        if let Some(p) = self.attribution.proportions.as_mut() {
            join(p);
        }
        if let Some(ext) = self.attribution.external.as_mut() {
            // A bare program name is looked up on PATH.
            if ext.program.components().count() > 1 {
                join(&mut ext.program);
            }
            for p in ext.expert_opinion.values_mut() {
                join(p);
            }
            if let Some(w) = ext.work_dir.as_mut() {
                join(w);
            }
        }
        if let Some(p) = self.exchange_rates.as_mut() {
            join(p);
        }
    }

    pub fn attribution_settings(&self) -> AttributionSettings {
        AttributionSettings {
            known_disease_coverage: self.constants.known_disease_coverage,
            tolerance: self.constants.tolerance,
        }
    }

    /// Working directory for the external attribution program.
    pub fn attribution_work_dir(&self) -> PathBuf {
        self.attribution
            .external
            .as_ref()
            .and_then(|e| e.work_dir.clone())
            .unwrap_or_else(|| self.output_dir.join("attribution"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [[simulation]]
        folder = "sim"
        prefix = "ahle_goat"
        species = "Goat"
        production_system = "Pastoral"
        year = 2021
    "#;

    #[test]
    fn fills_defaults() {
        let c = PipelineConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(c.country, "Ethiopia");
        assert_eq!(c.format, OutputFormat::Csv);
        assert_eq!(c.simulation[0].region, "National");
        assert!(c.simulation[0].scenarios.iter().any(|s| s == "ideal_af"));
        assert_eq!(c.constants.known_disease_coverage, 0.9);
        assert_eq!(c.constants.z, 1.96);
        assert_eq!(c.attribution.mappings.len(), 3);
        assert!(c.region_rollup.is_none());
        assert_eq!(c.partial_scenarios.len(), 15);
    }

    #[test]
    fn rejects_empty_sources() {
        let err = PipelineConfig::from_toml("country = \"Ethiopia\"").unwrap_err();
        assert!(matches!(err, AhleError::Config(_)));
    }

    #[test]
    fn rejects_two_attribution_sources() {
        let text = format!(
            "{MINIMAL}\n[attribution]\nproportions = \"p.csv\"\n[attribution.external]\nprogram = \"Rscript\"\nexpert_opinion = {{ Goat = \"e.csv\" }}\n"
        );
        assert!(PipelineConfig::from_toml(&text).is_err());
    }

    #[test]
    fn rejects_coverage_out_of_range() {
        let text = format!("{MINIMAL}\n[constants]\nknown_disease_coverage = 1.5\n");
        assert!(PipelineConfig::from_toml(&text).is_err());
    }

    #[test]
    fn resolves_paths_against_config_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ahle.toml");
        let mut f = fs::File::create(&path).unwrap();
        write!(f, "exchange_rates = \"rates.csv\"\nformat = \"parquet\"\n{MINIMAL}").unwrap();
        drop(f);

        let c = PipelineConfig::load(&path).unwrap();
        assert_eq!(c.simulation[0].folder, dir.path().join("sim"));
        assert_eq!(c.exchange_rates, Some(dir.path().join("rates.csv")));
        assert_eq!(c.output_dir, dir.path().join("output"));
        assert_eq!(c.format, OutputFormat::Parquet);
        assert_eq!(c.attribution_work_dir(), dir.path().join("output").join("attribution"));
    }
}
