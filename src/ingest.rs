//! Loading simulator output into [`ScenarioRecord`]s.
//!
//! Two layouts are accepted: one CSV per scenario named
//! `{prefix}_{scenario}.csv` with `Item, Group, Mean, StDev, ...` columns, and a
//! pre-combined wide table with `item, group, mean_{scenario}, stdev_{scenario}`.
//! A file that is missing or whose columns do not match is reported and
//! skipped; the caller decides whether anything usable is left.

use std::path::Path;

use polars::prelude::*;

use crate::config::{CombinedSource, SimulationSource};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::AhleError;
use crate::moments::Estimate;
use crate::schema::{derived, segment as seg_cols, simulator};
use crate::segment::SegmentKey;
use crate::store::{scenario, ItemType, ScenarioRecord};

/// Records from one source plus how many of its files were usable.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub records: Vec<ScenarioRecord>,
    pub attempted_files: usize,
    pub usable_files: usize,
}

impl LoadOutcome {
    pub fn absorb(&mut self, other: LoadOutcome) {
        self.records.extend(other.records);
        self.attempted_files += other.attempted_files;
        self.usable_files += other.usable_files;
    }
}

/// Load every scenario file of one simulator run.
pub fn load_simulation(src: &SimulationSource, diags: &mut Diagnostics) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();

    for suffix in &src.scenarios {
        let path = src.folder.join(format!("{}_{}.csv", src.prefix, suffix));
        outcome.attempted_files += 1;

        if !path.exists() {
            diags.push(
                DiagnosticKind::MissingFile,
                path.display().to_string(),
                "file not found, moving to next file",
            );
            continue;
        }

        let key_template = SegmentKey::new(
            src.region.as_str(),
            src.species.as_str(),
            src.production_system.as_str(),
            "",
            "",
            src.year,
        );
        match load_scenario_file(&path, suffix, &key_template, diags) {
            Ok(records) => {
                log::debug!("{}: {} records", path.display(), records.len());
                outcome.usable_files += 1;
                outcome.records.extend(records);
            }
            Err(e) => diags.push(DiagnosticKind::SchemaDrift, path.display().to_string(), e.to_string()),
        }
    }
    outcome
}

/// Load several simulator runs.
pub fn load_simulations(sources: &[SimulationSource], diags: &mut Diagnostics) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();
    for src in sources {
        outcome.absorb(load_simulation(src, diags));
    }
    outcome
}

/// Load a pre-combined wide table.
pub fn load_combined(src: &CombinedSource, diags: &mut Diagnostics) -> LoadOutcome {
    let mut outcome = LoadOutcome {
        attempted_files: 1,
        ..Default::default()
    };
    if !src.path.exists() {
        diags.push(
            DiagnosticKind::MissingFile,
            src.path.display().to_string(),
            "file not found",
        );
        return outcome;
    }
    match load_wide_table(src, diags) {
        Ok(records) => {
            outcome.usable_files = 1;
            outcome.records = records;
        }
        Err(e) => diags.push(DiagnosticKind::SchemaDrift, src.path.display().to_string(), e.to_string()),
    }
    outcome
}

/// Loaded records as a long frame: segment columns, scenario, item, mean, stdev.
pub fn records_frame(records: &[ScenarioRecord]) -> Result<DataFrame, AhleError> {
    let year: Vec<i32> = records.iter().map(|r| r.key.year).collect();
    let mean: Vec<f64> = records.iter().map(|r| r.estimate.mean).collect();
    let stdev: Vec<f64> = records.iter().map(|r| r.estimate.stdev).collect();

    Ok(DataFrame::new(vec![
        Column::new(seg_cols::REGION.into(), strings(records, |r| &r.key.region)),
        Column::new(seg_cols::SPECIES.into(), strings(records, |r| &r.key.species)),
        Column::new(seg_cols::PRODUCTION_SYSTEM.into(), strings(records, |r| &r.key.production_system)),
        Column::new(seg_cols::AGE_GROUP.into(), strings(records, |r| &r.key.age_group)),
        Column::new(seg_cols::SEX.into(), strings(records, |r| &r.key.sex)),
        Column::new(seg_cols::YEAR.into(), year),
        Column::new("scenario".into(), strings(records, |r| &r.scenario)),
        Column::new(simulator::ITEM.into(), strings(records, |r| &r.item)),
        Column::new(simulator::MEAN.into(), mean),
        Column::new(simulator::STDEV.into(), stdev),
    ])?)
}

fn strings<'a>(records: &'a [ScenarioRecord], field: impl Fn(&'a ScenarioRecord) -> &'a String) -> Vec<&'a str> {
    records.iter().map(|r| field(r).as_str()).collect()
}

// ── CSV helpers ─────────────────────────────────────────────────────────────

/// Read a CSV file with all columns as String dtype and cleaned column names.
pub fn read_csv_as_strings(path: &Path) -> Result<DataFrame, AhleError> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let cleaned: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| clean_column_name(c))
        .collect();
    df.set_column_names(cleaned.as_slice())?;
    Ok(df)
}

/// Lower-case, trim, and replace anything that is not alphanumeric with `_`.
/// "StDev" → "stdev", "Population Liveweight (kg)" → "population_liveweight_kg".
pub fn clean_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

pub fn require_columns(df: &DataFrame, required: &[&str], path: &Path) -> Result<(), AhleError> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(AhleError::MissingColumn {
                column: col_name.to_string(),
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Parse string columns to Float64; unparsable cells become null.
pub fn parse_floats(df: DataFrame, columns: &[String]) -> Result<DataFrame, AhleError> {
    let exprs: Vec<Expr> = columns
        .iter()
        .map(|c| {
            col(c.as_str())
                .str()
                .strip_chars(lit(" \t\r\n"))
                .cast(DataType::Float64)
        })
        .collect();
    Ok(df.lazy().with_columns(exprs).collect()?)
}

// ── Private helpers ─────────────────────────────────────────────────────────

fn load_scenario_file(
    path: &Path,
    suffix: &str,
    key_template: &SegmentKey,
    diags: &mut Diagnostics,
) -> Result<Vec<ScenarioRecord>, AhleError> {
    let raw = read_csv_as_strings(path)?;
    require_columns(
        &raw,
        &[simulator::ITEM, simulator::GROUP, simulator::MEAN, simulator::STDEV],
        path,
    )?;
    let df = parse_floats(raw, &[simulator::MEAN.to_string(), simulator::STDEV.to_string()])?;

    let items = df.column(simulator::ITEM)?.str()?;
    let groups = df.column(simulator::GROUP)?.str()?;
    let means = df.column(simulator::MEAN)?.f64()?;
    let stdevs = df.column(simulator::STDEV)?.f64()?;

    let scenario_name = scenario::canonical(suffix);
    let mut records = Vec::with_capacity(df.height());
    let mut stdev_issues = StdevIssues::default();

    for i in 0..df.height() {
        let (Some(item), Some(group), Some(mean)) = (items.get(i), groups.get(i), means.get(i)) else {
            continue;
        };
        let stdev = stdev_issues.check(stdevs.get(i));
        let key = SegmentKey::from_group(
            key_template.region.as_str(),
            key_template.species.as_str(),
            key_template.production_system.as_str(),
            group,
            key_template.year,
        );
        records.push(record(key, &scenario_name, item, mean, stdev, true));
    }

    stdev_issues.report(path, diags);
    Ok(records)
}

fn load_wide_table(src: &CombinedSource, diags: &mut Diagnostics) -> Result<Vec<ScenarioRecord>, AhleError> {
    let path = src.path.as_path();
    let raw = read_csv_as_strings(path)?;
    require_columns(&raw, &[simulator::ITEM, simulator::GROUP], path)?;

    let scenarios: Vec<String> = raw
        .get_column_names_str()
        .iter()
        .filter_map(|c| c.strip_prefix(simulator::MEAN_PREFIX))
        .filter(|s| is_scenario_suffix(s))
        .map(str::to_string)
        .collect();
    if scenarios.is_empty() {
        return Err(AhleError::MissingColumn {
            column: format!("{}<scenario>", simulator::MEAN_PREFIX),
            path: path.to_path_buf(),
        });
    }

    let stat_cols: Vec<String> = scenarios
        .iter()
        .flat_map(|s| {
            [
                format!("{}{s}", simulator::MEAN_PREFIX),
                format!("{}{s}", simulator::STDEV_PREFIX),
            ]
        })
        .filter(|c| raw.column(c).is_ok())
        .collect();
    let df = parse_floats(raw, &stat_cols)?;

    let items = df.column(simulator::ITEM)?.str()?;
    let groups = df.column(simulator::GROUP)?.str()?;
    let species = label_column(&df, seg_cols::SPECIES, src.species.as_deref(), path)?;
    let prodsys = label_column(&df, seg_cols::PRODUCTION_SYSTEM, src.production_system.as_deref(), path)?;
    let regions = label_column(&df, seg_cols::REGION, src.region.as_deref(), path)?;
    let years = df.column(seg_cols::YEAR).ok().map(|c| c.str()).transpose()?;

    let mut records = Vec::new();
    let mut stdev_issues = StdevIssues::default();

    for s in &scenarios {
        let means = df.column(&format!("{}{s}", simulator::MEAN_PREFIX))?.f64()?;
        let stdevs = df
            .column(&format!("{}{s}", simulator::STDEV_PREFIX))
            .ok()
            .map(|c| c.f64())
            .transpose()?;
        let scenario_name = scenario::canonical(s);

        for i in 0..df.height() {
            let (Some(item), Some(group), Some(mean)) = (items.get(i), groups.get(i), means.get(i)) else {
                continue;
            };
            let year = match years.and_then(|y| y.get(i)) {
                Some(y) => parse_year(y, path)?,
                None => src.year.ok_or_else(|| AhleError::MissingColumn {
                    column: seg_cols::YEAR.to_string(),
                    path: path.to_path_buf(),
                })?,
            };
            let stdev = stdev_issues.check(stdevs.and_then(|c| c.get(i)));
            let key = SegmentKey::from_group(
                regions.get(i),
                species.get(i),
                prodsys.get(i),
                group,
                year,
            );
            records.push(record(key, &scenario_name, item, mean, stdev, !src.costs_negated));
        }
    }

    stdev_issues.report(path, diags);
    Ok(records)
}

/// Stdev cells that were absent or negative. Both load as exact values.
#[derive(Default)]
struct StdevIssues {
    missing: usize,
    negative: usize,
}

impl StdevIssues {
    fn check(&mut self, value: Option<f64>) -> f64 {
        match value {
            None => {
                self.missing += 1;
                0.0
            }
            Some(s) if s < 0.0 => {
                self.negative += 1;
                0.0
            }
            Some(s) => s,
        }
    }

    fn report(&self, path: &Path, diags: &mut Diagnostics) {
        if self.missing > 0 {
            diags.push(
                DiagnosticKind::MissingStdev,
                path.display().to_string(),
                format!("{} cells without stdev, treated as exact", self.missing),
            );
        }
        if self.negative > 0 {
            diags.push(
                DiagnosticKind::DataQuality,
                path.display().to_string(),
                format!("{} cells with negative stdev, treated as exact", self.negative),
            );
        }
    }
}

/// A per-row label column, or a constant fallback when the column is absent.
enum Labels<'a> {
    Column(&'a StringChunked, Option<&'a str>),
    Constant(&'a str),
}

impl<'a> Labels<'a> {
    fn get(&self, i: usize) -> &'a str {
        match self {
            Labels::Column(ca, fallback) => ca.get(i).or(*fallback).unwrap_or(""),
            Labels::Constant(s) => s,
        }
    }
}

fn label_column<'a>(
    df: &'a DataFrame,
    name: &str,
    fallback: Option<&'a str>,
    path: &Path,
) -> Result<Labels<'a>, AhleError> {
    match (df.column(name).ok(), fallback) {
        (Some(c), fb) => Ok(Labels::Column(c.str()?, fb)),
        (None, Some(fb)) => Ok(Labels::Constant(fb)),
        (None, None) => Err(AhleError::MissingColumn {
            column: name.to_string(),
            path: path.to_path_buf(),
        }),
    }
}

fn parse_year(value: &str, path: &Path) -> Result<i32, AhleError> {
    let v = value.trim();
    v.parse::<i32>()
        .ok()
        .or_else(|| v.parse::<f64>().ok().map(|f| f as i32))
        .ok_or_else(|| AhleError::InvalidData(format!("bad year '{v}' in {}", path.display())))
}

fn is_scenario_suffix(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with("diff")
        && !s.ends_with(derived::USD)
        && !s.contains(derived::PER_KG_BIOMASS.trim_start_matches('_'))
}

fn record(key: SegmentKey, scenario: &str, item: &str, mean: f64, stdev: f64, negate_costs: bool) -> ScenarioRecord {
    let is_cost = ItemType::classify(item) == Some(ItemType::MonetaryCost);
    let mean = if negate_costs && is_cost { -mean } else { mean };
    ScenarioRecord {
        key,
        scenario: scenario.to_string(),
        item: item.to_string(),
        estimate: Estimate::new(mean, stdev),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn cleans_column_names() {
        assert_eq!(clean_column_name(" StDev "), "stdev");
        assert_eq!(clean_column_name("Population Liveweight (kg)"), "population_liveweight_kg");
        assert_eq!(clean_column_name("Item"), "item");
    }

    fn write(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn loads_scenarios_and_reports_missing_files() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "goat_past_current.csv",
            "Item,Group,Mean,StDev,Min\nGross Margin,Adult Female,1000,10,0\nHealth Cost,Adult Female,50,5,0\n",
        );
        write(
            dir.path(),
            "goat_past_all_mortality_zero.csv",
            "Item,Group,Mean,StDev\nGross Margin,Adult Female,1200,\n",
        );
        let src = SimulationSource {
            folder: dir.path().to_path_buf(),
            prefix: "goat_past".into(),
            scenarios: vec!["current".into(), "ideal".into(), "all_mortality_zero".into()],
            species: "Goat".into(),
            production_system: "Pastoral".into(),
            region: "National".into(),
            year: 2021,
        };
        let mut diags = Diagnostics::new();
        let out = load_simulation(&src, &mut diags);

        assert_eq!(out.attempted_files, 3);
        assert_eq!(out.usable_files, 2);
        assert_eq!(out.records.len(), 3);
        assert_eq!(diags.of_kind(DiagnosticKind::MissingFile).count(), 1);
        assert_eq!(diags.of_kind(DiagnosticKind::MissingStdev).count(), 1);

        let cost = out.records.iter().find(|r| r.item == "Health Cost").unwrap();
        assert_eq!(cost.estimate, Estimate::new(-50.0, 5.0));
        assert!(out.records.iter().any(|r| r.scenario == "mortality_zero"));
    }

    #[test]
    fn schema_drift_skips_only_that_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "x_current.csv", "Item,Group,Average\nGross Margin,Adult Female,1\n");
        write(dir.path(), "x_ideal.csv", "Item,Group,Mean,StDev\nGross Margin,Adult Female,2,0\n");
        let src = SimulationSource {
            folder: dir.path().to_path_buf(),
            prefix: "x".into(),
            scenarios: vec!["current".into(), "ideal".into()],
            species: "Sheep".into(),
            production_system: "Pastoral".into(),
            region: "National".into(),
            year: 2021,
        };
        let mut diags = Diagnostics::new();
        let out = load_simulation(&src, &mut diags);
        assert_eq!(out.usable_files, 1);
        let drift: Vec<_> = diags.of_kind(DiagnosticKind::SchemaDrift).collect();
        assert_eq!(drift.len(), 1);
        assert!(drift[0].context.ends_with("x_current.csv"));
    }

    #[test]
    fn negative_stdev_is_reported_not_masked() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "sheep_current.csv",
            "Item,Group,Mean,StDev\nGross Margin,Adult Female,800,-12\nGross Margin,Adult Male,400,6\n",
        );
        let src = SimulationSource {
            folder: dir.path().to_path_buf(),
            prefix: "sheep".into(),
            scenarios: vec!["current".into()],
            species: "Sheep".into(),
            production_system: "Pastoral".into(),
            region: "National".into(),
            year: 2021,
        };
        let mut diags = Diagnostics::new();
        let out = load_simulation(&src, &mut diags);

        let quality: Vec<_> = diags.of_kind(DiagnosticKind::DataQuality).collect();
        assert_eq!(quality.len(), 1);
        assert!(quality[0].message.contains("negative stdev"));
        let female = out.records.iter().find(|r| r.key.sex == "Female").unwrap();
        assert_eq!(female.estimate, Estimate::new(800.0, 0.0));
        let male = out.records.iter().find(|r| r.key.sex == "Male").unwrap();
        assert_eq!(male.estimate, Estimate::new(400.0, 6.0));
    }

    #[test]
    fn loads_wide_table() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "combined.csv",
            "species,production_system,year,item,group,mean_current,stdev_current,mean_ideal,stdev_ideal,mean_diff_ideal\n\
             Cattle,Pastoral,2021,Gross Margin,Overall,100,1,150,2,50\n",
        );
        let src = CombinedSource {
            path: dir.path().join("combined.csv"),
            species: None,
            production_system: None,
            region: Some("National".into()),
            year: None,
            costs_negated: true,
        };
        let mut diags = Diagnostics::new();
        let out = load_combined(&src, &mut diags);
        assert_eq!(out.usable_files, 1);
        assert_eq!(out.records.len(), 2);
        assert!(out.records.iter().all(|r| r.key.species == "Cattle" && r.key.year == 2021));
    }
}
