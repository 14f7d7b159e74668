//! Flattening the loss, scenario and delta tables into polars frames, and
//! writing frames to disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;

use crate::attribution::{Attribution, AttributionCell, Cause, CellState, DiseaseLabel};
use crate::config::OutputFormat;
use crate::differencer::{Counterfactual, LossComponent, LossTable};
use crate::error::AhleError;
use crate::hierarchy::MeasureTable;
use crate::moments::{difference, FillPolicy, Moments};
use crate::schema::{loss, segment as seg_cols, simulator, summary};
use crate::segment::SegmentKey;
use crate::store::{scenario, ItemType, ScenarioStore};

/// Segment key columns, filled row by row.
#[derive(Default)]
struct SegmentColumns {
    region: Vec<String>,
    species: Vec<String>,
    production_system: Vec<String>,
    age_group: Vec<String>,
    sex: Vec<String>,
    year: Vec<i32>,
    group: Vec<String>,
}

impl SegmentColumns {
    fn push(&mut self, key: &SegmentKey) {
        self.region.push(key.region.clone());
        self.species.push(key.species.clone());
        self.production_system.push(key.production_system.clone());
        self.age_group.push(key.age_group.clone());
        self.sex.push(key.sex.clone());
        self.year.push(key.year);
        self.group.push(key.group_label());
    }

    fn into_columns(self) -> Vec<Column> {
        vec![
            Column::new(seg_cols::REGION.into(), self.region),
            Column::new(seg_cols::SPECIES.into(), self.species),
            Column::new(seg_cols::PRODUCTION_SYSTEM.into(), self.production_system),
            Column::new(seg_cols::AGE_GROUP.into(), self.age_group),
            Column::new(seg_cols::SEX.into(), self.sex),
            Column::new(seg_cols::YEAR.into(), self.year),
            Column::new(seg_cols::GROUP.into(), self.group),
        ]
    }
}

#[derive(Default)]
struct LossRows {
    segments: SegmentColumns,
    age_class: Vec<String>,
    component: Vec<&'static str>,
    cause: Vec<&'static str>,
    disease: Vec<&'static str>,
    mean: Vec<f64>,
    stdev: Vec<f64>,
    state: Vec<&'static str>,
    flagged: Vec<bool>,
}

impl LossRows {
    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        key: &SegmentKey,
        age_class: &str,
        component: LossComponent,
        cause: Cause,
        disease: DiseaseLabel,
        value: Moments,
        state: CellState,
        flagged: bool,
    ) {
        self.segments.push(key);
        self.age_class.push(age_class.to_string());
        self.component.push(component.name());
        self.cause.push(cause.name());
        self.disease.push(disease.name());
        self.mean.push(value.mean);
        self.stdev.push(value.stdev());
        self.state.push(state.name());
        self.flagged.push(flagged);
    }
}

/// The loss envelope in long form: every counterfactual component of every
/// segment, followed by the cause and disease detail of attributed cells.
/// Rows of a segment and counterfactual in `inconsistent` are flagged.
pub fn loss_frame(
    table: &LossTable,
    cells: &[AttributionCell],
    attribution: &Attribution,
    inconsistent: &BTreeSet<(SegmentKey, Counterfactual)>,
) -> Result<DataFrame, AhleError> {
    let age_classes: BTreeMap<&SegmentKey, &str> =
        cells.iter().map(|c| (&c.key, c.age_class.as_str())).collect();
    let mut rows = LossRows::default();

    for (key, measures) in table {
        let group = key.group_label();
        let age_class = age_classes.get(key).copied().unwrap_or(group.as_str());
        for (lk, value) in measures {
            let (cause, disease) = match lk.counterfactual {
                Counterfactual::Current => (Cause::All, DiseaseLabel::All),
                Counterfactual::Disease(d) => (Cause::Infectious, DiseaseLabel::Known(d)),
            };
            let state = match lk.counterfactual {
                Counterfactual::Current => attribution
                    .states
                    .get(&(key.clone(), lk.component))
                    .copied()
                    .unwrap_or(CellState::Unattributed),
                Counterfactual::Disease(_) => CellState::Unattributed,
            };
            let flagged = inconsistent.contains(&(key.clone(), lk.counterfactual));
            rows.push(key, age_class, lk.component, cause, disease, *value, state, flagged);
        }
    }

    for r in &attribution.rows {
        rows.push(&r.key, &r.age_class, r.component, r.cause, r.disease, r.value, r.state, r.flagged);
    }

    let mut columns = rows.segments.into_columns();
    columns.extend([
        Column::new(loss::AGE_CLASS.into(), rows.age_class),
        Column::new(loss::COMPONENT.into(), rows.component),
        Column::new(loss::CAUSE.into(), rows.cause),
        Column::new(loss::DISEASE.into(), rows.disease),
        Column::new(loss::MEAN.into(), rows.mean),
        Column::new(loss::STDEV.into(), rows.stdev),
        Column::new(loss::ATTRIBUTION_STATE.into(), rows.state),
        Column::new(loss::FLAGGED.into(), rows.flagged),
    ]);
    Ok(DataFrame::new(columns)?)
}

/// One row per segment and item with `mean_{scenario}` / `stdev_{scenario}`
/// for every scenario, plus the ideal-minus-current gap.
pub fn scenario_summary_frame(store: &ScenarioStore) -> Result<DataFrame, AhleError> {
    let scenarios: Vec<String> = store.scenarios().into_iter().collect();
    let mut segments = SegmentColumns::default();
    let mut items = Vec::new();
    let mut item_types: Vec<Option<&'static str>> = Vec::new();
    let mut is_currency = Vec::new();
    let mut means: Vec<Vec<Option<f64>>> = vec![Vec::new(); scenarios.len()];
    let mut stdevs: Vec<Vec<Option<f64>>> = vec![Vec::new(); scenarios.len()];
    let mut diff_mean = Vec::new();
    let mut diff_stdev = Vec::new();

    for key in store.segments() {
        let Some(cells) = store.cells_of(key) else {
            continue;
        };
        let key_items: BTreeSet<&str> = cells.keys().map(|c| c.item.as_str()).collect();
        for item in key_items {
            let item_type = ItemType::classify(item);
            segments.push(key);
            items.push(item.to_string());
            item_types.push(item_type.map(ItemType::code));
            is_currency.push(item_type.is_some_and(ItemType::is_currency));

            for (i, s) in scenarios.iter().enumerate() {
                let m = store.moments(key, s, item);
                means[i].push(m.map(|m| m.mean));
                stdevs[i].push(m.map(Moments::stdev));
            }
            let gap = difference(
                store.moments(key, scenario::IDEAL, item),
                store.moments(key, scenario::CURRENT, item),
                FillPolicy::Propagate,
            );
            diff_mean.push(gap.map(|m| m.mean));
            diff_stdev.push(gap.map(Moments::stdev));
        }
    }

    let mut columns = segments.into_columns();
    columns.push(Column::new(summary::ITEM.into(), items));
    columns.push(Column::new(summary::ITEM_TYPE.into(), item_types));
    columns.push(Column::new(summary::IS_CURRENCY.into(), is_currency));
    for (i, s) in scenarios.iter().enumerate() {
        columns.push(Column::new(
            format!("{}{s}", simulator::MEAN_PREFIX).into(),
            std::mem::take(&mut means[i]),
        ));
        columns.push(Column::new(
            format!("{}{s}", simulator::STDEV_PREFIX).into(),
            std::mem::take(&mut stdevs[i]),
        ));
    }
    columns.push(Column::new(summary::MEAN_DIFF_IDEAL.into(), diff_mean));
    columns.push(Column::new(summary::STDEV_DIFF_IDEAL.into(), diff_stdev));
    Ok(DataFrame::new(columns)?)
}

/// Partial-scenario gross-margin deltas in long form.
pub fn deltas_frame(deltas: &MeasureTable<String>) -> Result<DataFrame, AhleError> {
    let mut segments = SegmentColumns::default();
    let mut scenarios = Vec::new();
    let mut mean = Vec::new();
    let mut stdev = Vec::new();

    for (key, row) in deltas {
        for (s, m) in row {
            segments.push(key);
            scenarios.push(s.clone());
            mean.push(m.mean);
            stdev.push(m.stdev());
        }
    }

    let mut columns = segments.into_columns();
    columns.extend([
        Column::new("scenario".into(), scenarios),
        Column::new(loss::MEAN.into(), mean),
        Column::new(loss::STDEV.into(), stdev),
    ]);
    Ok(DataFrame::new(columns)?)
}

/// Write `df` as `<dir>/<stem>.<ext>`, creating `dir` if needed.
pub fn write_frame(
    df: &mut DataFrame,
    dir: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<PathBuf, AhleError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stem}.{}", format.extension()));
    let mut file = File::create(&path)?;
    match format {
        OutputFormat::Csv => CsvWriter::new(&mut file).include_header(true).finish(df)?,
        OutputFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
    }
    log::info!("wrote {} rows to {}", df.height(), path.display());
    Ok(path)
}
