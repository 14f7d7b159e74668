//! Running the external attribution program over disjoint partitions.
//!
//! Each (species, year, region) partition gets its own estimates shard and
//! output file under the work directory. Partitions run in parallel; a
//! non-zero exit, a timeout or an unreadable output fails only that partition.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use polars::prelude::*;
use rayon::prelude::*;
use serde::Deserialize;

use crate::attribution::{AttributionCell, CauseProportions};
use crate::differencer::{Counterfactual, LossComponent, LossKey, LossTable};
use crate::error::AhleError;
use crate::ingest::read_csv_as_strings;
use crate::schema::attribution_input as cols;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn default_timeout() -> u64 {
    600
}

/// How to call the attribution program:
/// `program [args…] <estimates.csv> <expert_opinion.csv> <output.csv>`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalAttribution {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Expert-opinion file per attributed species.
    pub expert_opinion: BTreeMap<String, PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Where shards are written. Defaults to `<output_dir>/attribution`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    pub species: String,
    pub year: i32,
    pub region: String,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.species, self.year, self.region)
    }
}

impl Partition {
    fn slug(&self) -> String {
        let raw = format!("{}_{}_{}", self.species, self.year, self.region);
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    }
}

/// Proportions from every successful partition, each held under its own
/// (region, year), plus the failures.
#[derive(Debug, Default)]
pub struct ExternalReport {
    pub proportions: CauseProportions,
    pub failed: Vec<(Partition, String)>,
    pub succeeded: usize,
}

impl ExternalAttribution {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Run every partition; returns once all workers have finished.
    pub fn run(
        &self,
        table: &LossTable,
        cells: &[AttributionCell],
        work_dir: &Path,
    ) -> Result<ExternalReport, AhleError> {
        std::fs::create_dir_all(work_dir)?;

        let mut partitions: BTreeMap<Partition, Vec<&AttributionCell>> = BTreeMap::new();
        for cell in cells {
            let p = Partition {
                species: cell.key.species.clone(),
                year: cell.key.year,
                region: cell.key.region.clone(),
            };
            partitions.entry(p).or_default().push(cell);
        }
        log::info!("running attribution over {} partitions", partitions.len());

        let results: Vec<(Partition, Result<CauseProportions, AhleError>)> = partitions
            .into_par_iter()
            .map(|(p, cells)| {
                let result = self.run_partition(&p, &cells, table, work_dir);
                (p, result)
            })
            .collect();

        let mut report = ExternalReport::default();
        for (p, result) in results {
            match result {
                Ok(props) => {
                    report.succeeded += 1;
                    report.proportions.insert_scoped(&p.region, p.year, props);
                }
                Err(e) => report.failed.push((p, e.to_string())),
            }
        }
        Ok(report)
    }

    fn run_partition(
        &self,
        partition: &Partition,
        cells: &[&AttributionCell],
        table: &LossTable,
        work_dir: &Path,
    ) -> Result<CauseProportions, AhleError> {
        let expert = self
            .expert_opinion
            .iter()
            .find(|(s, _)| s.trim().eq_ignore_ascii_case(partition.species.trim()))
            .map(|(_, path)| path)
            .ok_or_else(|| AhleError::External(format!("no expert opinion file for {}", partition.species)))?;

        let slug = partition.slug();
        let estimates_path = work_dir.join(format!("estimates_{slug}.csv"));
        let output_path = work_dir.join(format!("attribution_{slug}.csv"));
        let log_path = work_dir.join(format!("attribution_{slug}.log"));

        let mut estimates = estimates_frame(cells, table)?;
        let mut file = File::create(&estimates_path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut estimates)?;

        let log_file = File::create(&log_path)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&estimates_path)
            .arg(expert)
            .arg(&output_path)
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .spawn()
            .map_err(|e| AhleError::External(format!("cannot start {}: {e}", self.program.display())))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout() {
                // The child may have exited between the poll and the kill.
                let _ = child.kill();
                let _ = child.wait();
                return Err(AhleError::External(format!(
                    "timed out after {}s (log: {})",
                    self.timeout_secs,
                    log_path.display()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(AhleError::External(format!(
                "exited with {status} (log: {})",
                log_path.display()
            )));
        }
        log::debug!("partition {partition} finished in {:?}", started.elapsed());

        let raw = read_csv_as_strings(&output_path)?;
        CauseProportions::from_frame(raw, &output_path)
    }
}

/// The estimates shard for one partition: one row per cell and component.
pub fn estimates_frame(cells: &[&AttributionCell], table: &LossTable) -> Result<DataFrame, AhleError> {
    let mut species = Vec::new();
    let mut prodsys = Vec::new();
    let mut age = Vec::new();
    let mut component = Vec::new();
    let mut mean = Vec::new();
    let mut sd = Vec::new();
    let mut region = Vec::new();
    let mut year = Vec::new();

    for cell in cells {
        let Some(row) = table.get(&cell.key) else {
            continue;
        };
        for c in LossComponent::PARTS {
            let Some(m) = row.get(&LossKey::new(Counterfactual::Current, c)) else {
                continue;
            };
            species.push(cell.key.species.clone());
            prodsys.push(cell.production_system.clone());
            age.push(cell.age_class.clone());
            component.push(c.label());
            mean.push(m.mean);
            sd.push(m.stdev());
            region.push(cell.key.region.clone());
            year.push(cell.key.year);
        }
    }

    Ok(DataFrame::new(vec![
        Column::new(cols::SPECIES.into(), &species),
        Column::new(cols::PRODUCTION_SYSTEM.into(), &prodsys),
        Column::new(cols::AGE_CLASS.into(), &age),
        Column::new(cols::AHLE.into(), &component),
        Column::new(cols::MEAN.into(), &mean),
        Column::new(cols::SD.into(), &sd),
        Column::new(cols::REGION.into(), &region),
        Column::new(cols::YEAR.into(), &year),
    ])?)
}
