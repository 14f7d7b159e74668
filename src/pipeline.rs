//! End-to-end run: ingest, roll up, difference, attribute, normalise.

use std::path::{Path, PathBuf};

use polars::prelude::DataFrame;

use crate::attribution::{apportion, attribution_cells, AttributionCell, CauseProportions};
use crate::config::{OutputFormat, PipelineConfig};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::differencer::{
    check_sum_consistency, difference_all, log_partial_coverage, rederive_residuals, scenario_deltas,
    zero_inapplicable, Counterfactual, LossTable,
};
use crate::error::AhleError;
use crate::exchange::ExchangeRates;
use crate::external::Partition;
use crate::hierarchy::{roll_up, RollupPlan};
use crate::ingest::{load_combined, load_simulations};
use crate::normalize::{liveweight_frame, normalize, NormalizeOptions};
use crate::output::{deltas_frame, loss_frame, scenario_summary_frame, write_frame};
use crate::schema::summary;
use crate::store::ScenarioStore;

/// Everything a run produces.
pub struct PipelineReport {
    /// Typed loss table after roll-up, before flattening.
    pub losses: LossTable,
    pub loss_table: DataFrame,
    pub scenario_summary: DataFrame,
    pub scenario_deltas: DataFrame,
    pub diagnostics: Diagnostics,
    pub failed_partitions: Vec<(Partition, String)>,
}

impl PipelineReport {
    /// Write every table to `dir`; returns the written paths.
    pub fn write_outputs(&mut self, dir: &Path, format: OutputFormat) -> Result<Vec<PathBuf>, AhleError> {
        let mut diagnostics = self.diagnostics.to_dataframe()?;
        Ok(vec![
            write_frame(&mut self.loss_table, dir, "ahle_loss_envelope", format)?,
            write_frame(&mut self.scenario_summary, dir, "ahle_scenario_summary", format)?,
            write_frame(&mut self.scenario_deltas, dir, "ahle_scenario_deltas", format)?,
            write_frame(&mut diagnostics, dir, "ahle_diagnostics", format)?,
        ])
    }
}

pub fn run(config: &PipelineConfig) -> Result<PipelineReport, AhleError> {
    let mut diags = Diagnostics::new();

    // ── Ingest ──
    let mut outcome = load_simulations(&config.simulation, &mut diags);
    for src in &config.combined {
        outcome.absorb(load_combined(src, &mut diags));
    }
    if outcome.usable_files == 0 || outcome.records.is_empty() {
        return Err(AhleError::NoUsableInput(format!(
            "none of {} input files could be used",
            outcome.attempted_files
        )));
    }
    log::info!(
        "loaded {} records from {} of {} files",
        outcome.records.len(),
        outcome.usable_files,
        outcome.attempted_files
    );
    let store = ScenarioStore::from_records(outcome.records);

    // ── Roll up and difference ──
    let plan = RollupPlan::standard(config.region_rollup.as_deref());
    let rolled_store = ScenarioStore::from_table(roll_up(store.table(), &plan)?);
    log::info!("scenario store: {} segments after roll-up", rolled_store.len());

    let leaf_losses = difference_all(&store, &Counterfactual::ALL, &mut diags);
    let losses = zero_inapplicable(rederive_residuals(roll_up(&leaf_losses, &plan)?));
    let violations = check_sum_consistency(&losses, config.constants.tolerance, &mut diags);
    log::info!("loss table: {} segments, {} sum violations", losses.len(), violations.len());

    let deltas = scenario_deltas(&rolled_store, &config.partial_scenarios);
    log_partial_coverage(&deltas, &losses);

    // ── Attribution ──
    let cells = attribution_cells(&losses, &config.attribution.mappings);
    let (proportions, failed_partitions) = cause_proportions(config, &losses, &cells, &mut diags)?;
    proportions.validate(config.constants.tolerance, &mut diags);
    let attribution = apportion(
        &losses,
        &cells,
        &proportions,
        &config.attribution_settings(),
        &mut diags,
    )?;

    // ── Output frames ──
    let rates = match &config.exchange_rates {
        Some(path) if path.exists() => Some(ExchangeRates::load(path, &mut diags)?),
        Some(path) => {
            diags.push(
                DiagnosticKind::MissingFile,
                path.display().to_string(),
                "exchange rates not found, no USD columns",
            );
            None
        }
        None => None,
    };
    let liveweight = liveweight_frame(&rolled_store, &mut diags)?;
    let options = |mask: Option<&'static str>| NormalizeOptions {
        liveweight: Some(&liveweight),
        rates: rates.as_ref().map(|r| (r, config.country.as_str())),
        currency_mask: mask,
        z: config.constants.z,
    };

    let loss_table = normalize(
        loss_frame(&losses, &cells, &attribution, &violations)?,
        &options(None),
        &mut diags,
    )?;
    let scenario_summary = normalize(
        scenario_summary_frame(&rolled_store)?,
        &options(Some(summary::IS_CURRENCY)),
        &mut diags,
    )?;
    let scenario_deltas = normalize(deltas_frame(&deltas)?, &options(None), &mut diags)?;
    log::info!(
        "run finished: {} loss rows, {} diagnostics",
        loss_table.height(),
        diags.len()
    );

    Ok(PipelineReport {
        losses,
        loss_table,
        scenario_summary,
        scenario_deltas,
        diagnostics: diags,
        failed_partitions,
    })
}

/// Cause proportions from the configured source. Without one, only the
/// health-cost placeholder split is produced.
fn cause_proportions(
    config: &PipelineConfig,
    losses: &LossTable,
    cells: &[AttributionCell],
    diags: &mut Diagnostics,
) -> Result<(CauseProportions, Vec<(Partition, String)>), AhleError> {
    if let Some(path) = &config.attribution.proportions {
        if !path.exists() {
            diags.push(
                DiagnosticKind::MissingFile,
                path.display().to_string(),
                "cause proportions not found, cells stay unattributed",
            );
            return Ok((CauseProportions::new(), Vec::new()));
        }
        return Ok((CauseProportions::load(path)?, Vec::new()));
    }

    let Some(external) = &config.attribution.external else {
        log::info!("no attribution source configured");
        return Ok((CauseProportions::new(), Vec::new()));
    };
    let report = external.run(losses, cells, &config.attribution_work_dir())?;
    for (partition, reason) in &report.failed {
        diags.push(DiagnosticKind::FailedPartition, partition.to_string(), reason.clone());
    }
    log::info!(
        "attribution: {} partitions succeeded, {} failed",
        report.succeeded,
        report.failed.len()
    );
    Ok((report.proportions, report.failed))
}
