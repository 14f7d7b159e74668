use std::path::PathBuf;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use pyo3_polars::PyDataFrame;

use crate::config::{OutputFormat, PipelineConfig, SimulationSource};
use crate::diagnostics::Diagnostics;
use crate::error::AhleError;
use crate::ingest::{load_simulation, records_frame};
use crate::pipeline::{self, PipelineReport};
use crate::schema;

#[pyclass]
pub struct AhleEngine {
    config: PipelineConfig,
    report: Option<PipelineReport>,
}

impl AhleEngine {
    fn report(&self) -> Result<&PipelineReport, AhleError> {
        self.report
            .as_ref()
            .ok_or_else(|| AhleError::NotLoaded("call run() first".into()))
    }
}

#[pymethods]
impl AhleEngine {
    #[staticmethod]
    fn from_config(path: String) -> PyResult<Self> {
        let config = PipelineConfig::load(&PathBuf::from(path))?;
        Ok(Self { config, report: None })
    }

    /// Run the whole pipeline; returns the loss envelope.
    fn run(&mut self) -> PyResult<PyDataFrame> {
        let report = pipeline::run(&self.config)?;
        let df = report.loss_table.clone();
        self.report = Some(report);
        Ok(PyDataFrame(df))
    }

    fn loss_table(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.report()?.loss_table.clone()))
    }

    fn scenario_summary(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.report()?.scenario_summary.clone()))
    }

    fn scenario_deltas(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.report()?.scenario_deltas.clone()))
    }

    fn diagnostics(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.report()?.diagnostics.to_dataframe()?))
    }

    /// Write all tables; `format` is "csv" or "parquet".
    #[pyo3(signature = (output_dir=None, format=None))]
    fn write_outputs(&mut self, output_dir: Option<String>, format: Option<&str>) -> PyResult<Vec<String>> {
        let dir = output_dir.map(PathBuf::from).unwrap_or_else(|| self.config.output_dir.clone());
        let format = match format {
            None => self.config.format,
            Some("csv") => OutputFormat::Csv,
            Some("parquet") => OutputFormat::Parquet,
            Some(other) => return Err(PyValueError::new_err(format!("unknown format '{other}'"))),
        };
        let report = self
            .report
            .as_mut()
            .ok_or_else(|| AhleError::NotLoaded("call run() first".into()))?;
        let paths = report.write_outputs(&dir, format)?;
        Ok(paths.iter().map(|p| p.display().to_string()).collect())
    }

    /// Load one simulator run as a long frame, without running the pipeline.
    #[staticmethod]
    #[pyo3(signature = (folder, prefix, species, production_system, year, scenarios, region="National"))]
    fn load_simulation(
        folder: String,
        prefix: String,
        species: String,
        production_system: String,
        year: i32,
        scenarios: Vec<String>,
        region: &str,
    ) -> PyResult<PyDataFrame> {
        let src = SimulationSource {
            folder: PathBuf::from(folder),
            prefix,
            scenarios,
            species,
            production_system,
            region: region.to_string(),
            year,
        };
        let mut diags = Diagnostics::new();
        let outcome = load_simulation(&src, &mut diags);
        if outcome.usable_files == 0 {
            return Err(AhleError::NoUsableInput(format!(
                "none of {} files under {} could be used",
                outcome.attempted_files,
                src.folder.display()
            ))
            .into());
        }
        Ok(PyDataFrame(records_frame(&outcome.records)?))
    }
}

/// Export schema constants as Python submodules
pub fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Segment
    let segment = PyModule::new(m.py(), "segment")?;
    segment.add("REGION", schema::segment::REGION)?;
    segment.add("SPECIES", schema::segment::SPECIES)?;
    segment.add("PRODUCTION_SYSTEM", schema::segment::PRODUCTION_SYSTEM)?;
    segment.add("AGE_GROUP", schema::segment::AGE_GROUP)?;
    segment.add("SEX", schema::segment::SEX)?;
    segment.add("YEAR", schema::segment::YEAR)?;
    segment.add("GROUP", schema::segment::GROUP)?;
    m.add_submodule(&segment)?;

    // Loss envelope
    let loss = PyModule::new(m.py(), "loss")?;
    loss.add("AGE_CLASS", schema::loss::AGE_CLASS)?;
    loss.add("COMPONENT", schema::loss::COMPONENT)?;
    loss.add("CAUSE", schema::loss::CAUSE)?;
    loss.add("DISEASE", schema::loss::DISEASE)?;
    loss.add("MEAN", schema::loss::MEAN)?;
    loss.add("STDEV", schema::loss::STDEV)?;
    loss.add("ATTRIBUTION_STATE", schema::loss::ATTRIBUTION_STATE)?;
    loss.add("FLAGGED", schema::loss::FLAGGED)?;
    m.add_submodule(&loss)?;

    // Scenario summary
    let summary = PyModule::new(m.py(), "summary")?;
    summary.add("ITEM", schema::summary::ITEM)?;
    summary.add("ITEM_TYPE", schema::summary::ITEM_TYPE)?;
    summary.add("IS_CURRENCY", schema::summary::IS_CURRENCY)?;
    summary.add("MEAN_DIFF_IDEAL", schema::summary::MEAN_DIFF_IDEAL)?;
    summary.add("STDEV_DIFF_IDEAL", schema::summary::STDEV_DIFF_IDEAL)?;
    m.add_submodule(&summary)?;

    // Derived views
    let derived = PyModule::new(m.py(), "derived")?;
    derived.add("USD", schema::derived::USD)?;
    derived.add("PER_KG_BIOMASS", schema::derived::PER_KG_BIOMASS)?;
    derived.add("LOWER95", schema::derived::LOWER95)?;
    derived.add("UPPER95", schema::derived::UPPER95)?;
    m.add_submodule(&derived)?;

    // Diagnostics
    let diagnostics = PyModule::new(m.py(), "diagnostics")?;
    diagnostics.add("SEVERITY", schema::diagnostics::SEVERITY)?;
    diagnostics.add("KIND", schema::diagnostics::KIND)?;
    diagnostics.add("CONTEXT", schema::diagnostics::CONTEXT)?;
    diagnostics.add("MESSAGE", schema::diagnostics::MESSAGE)?;
    m.add_submodule(&diagnostics)?;

    Ok(())
}
