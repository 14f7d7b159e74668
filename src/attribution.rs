//! Apportioning loss components across causes and diseases.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use polars::prelude::*;
use serde::Deserialize;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::differencer::{Counterfactual, Disease, LossComponent, LossKey, LossTable};
use crate::error::AhleError;
use crate::ingest::{parse_floats, read_csv_as_strings, require_columns};
use crate::moments::{sum_present, Moments};
use crate::schema::attribution as cols;
use crate::segment::{self, SegmentKey, ALL_POULTRY, ALL_SMALL_RUMINANTS};

// ── Causes and disease labels ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cause {
    All,
    Infectious,
    NonInfectious,
    External,
}

impl Cause {
    pub const ATTRIBUTED: [Cause; 3] = [Cause::Infectious, Cause::NonInfectious, Cause::External];

    pub fn name(self) -> &'static str {
        match self {
            Cause::All => "All",
            Cause::Infectious => "Infectious",
            Cause::NonInfectious => "Non-infectious",
            Cause::External => "External",
        }
    }

    pub fn parse(s: &str) -> Option<Cause> {
        let norm: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match norm.as_str() {
            "infectious" => Some(Cause::Infectious),
            "noninfectious" => Some(Cause::NonInfectious),
            "external" => Some(Cause::External),
            "all" => Some(Cause::All),
            _ => None,
        }
    }
}

/// Disease dimension of an output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiseaseLabel {
    All,
    Known(Disease),
    OtherInfectious,
    /// The single disease label of non-infectious loss.
    AllConditions,
    /// The single disease label of external loss.
    AllCauses,
}

impl DiseaseLabel {
    pub fn name(self) -> &'static str {
        match self {
            DiseaseLabel::All => "All",
            DiseaseLabel::Known(d) => d.label(),
            DiseaseLabel::OtherInfectious => "Other infectious",
            DiseaseLabel::AllConditions => "All conditions",
            DiseaseLabel::AllCauses => "All causes",
        }
    }

    fn for_cause(cause: Cause) -> DiseaseLabel {
        match cause {
            Cause::NonInfectious => DiseaseLabel::AllConditions,
            Cause::External => DiseaseLabel::AllCauses,
            Cause::All | Cause::Infectious => DiseaseLabel::All,
        }
    }
}

/// Progress of one (segment, component) cell. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellState {
    Unattributed,
    Placeholder,
    Finalized,
}

impl CellState {
    pub fn name(self) -> &'static str {
        match self {
            CellState::Unattributed => "unattributed",
            CellState::Placeholder => "placeholder",
            CellState::Finalized => "finalized",
        }
    }

    pub fn advance(self, to: CellState) -> Result<CellState, AhleError> {
        if to < self {
            return Err(AhleError::Validation(format!(
                "attribution state cannot move from {} back to {}",
                self.name(),
                to.name()
            )));
        }
        Ok(to)
    }
}

// ── Cause proportions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProportionKey {
    pub species: String,
    pub production_system: String,
    pub age_class: String,
    pub component: LossComponent,
}

impl ProportionKey {
    pub fn new(species: &str, production_system: &str, age_class: &str, component: LossComponent) -> Self {
        Self {
            species: normalize(species),
            production_system: normalize(production_system),
            age_class: normalize(age_class),
            component,
        }
    }
}

type ProportionMap = HashMap<ProportionKey, BTreeMap<Cause, f64>>;

/// `(species, production_system, age_class, component) → {cause → proportion}`.
///
/// Proportions read from one table apply everywhere. Proportions produced for
/// a single (region, year) partition are held under that scope and take
/// precedence for segments in it.
#[derive(Debug, Clone, Default)]
pub struct CauseProportions {
    map: ProportionMap,
    scoped: BTreeMap<(String, i32), ProportionMap>,
}

impl CauseProportions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ProportionKey, cause: Cause, proportion: f64) {
        *self.map.entry(key).or_default().entry(cause).or_insert(0.0) += proportion;
    }

    pub fn get(&self, key: &ProportionKey) -> Option<&BTreeMap<Cause, f64>> {
        self.map.get(key)
    }

    /// Proportions for a segment: its own (region, year) scope first, then
    /// the unscoped table.
    pub fn lookup(&self, segment: &SegmentKey, key: &ProportionKey) -> Option<&BTreeMap<Cause, f64>> {
        self.scoped
            .get(&(segment.region.clone(), segment.year))
            .and_then(|m| m.get(key))
            .or_else(|| self.map.get(key))
    }

    /// Number of keys across the unscoped table and every scope.
    pub fn len(&self) -> usize {
        self.map.len() + self.scoped.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// File the unscoped proportions of `other` under one (region, year).
    pub fn insert_scoped(&mut self, region: &str, year: i32, other: CauseProportions) {
        let scope = self.scoped.entry((region.to_string(), year)).or_default();
        for (key, causes) in other.map {
            scope.entry(key).or_default().extend(causes);
        }
    }

    /// Report every key whose proportions do not sum to 1 within `tolerance`.
    pub fn validate(&self, tolerance: f64, diags: &mut Diagnostics) -> usize {
        let unscoped = self.map.iter().map(|(k, c)| (String::new(), k, c));
        let scoped = self.scoped.iter().flat_map(|((region, year), m)| {
            let prefix = format!("{region} {year}: ");
            m.iter().map(move |(k, c)| (prefix.clone(), k, c))
        });

        let mut bad = 0;
        for (prefix, key, causes) in unscoped.chain(scoped) {
            let sum: f64 = causes.values().sum();
            if (sum - 1.0).abs() > tolerance {
                bad += 1;
                diags.push(
                    DiagnosticKind::ConsistencyViolation,
                    format!(
                        "{prefix}{}/{}/{}/{}",
                        key.species,
                        key.production_system,
                        key.age_class,
                        key.component.name()
                    ),
                    format!("cause proportions sum to {sum}"),
                );
            }
        }
        bad
    }

    /// Read a proportion table: `species, production_system, age_class,
    /// component, cause, proportion`.
    pub fn load(path: &Path) -> Result<Self, AhleError> {
        let raw = read_csv_as_strings(path)?;
        Self::from_frame(raw, path)
    }

    /// Build from a frame carrying either a `proportion` column or a per-cause
    /// `mean` column; means are normalised within their key.
    pub fn from_frame(raw: DataFrame, path: &Path) -> Result<Self, AhleError> {
        let component_col = if raw.column(cols::COMPONENT).is_ok() {
            cols::COMPONENT
        } else {
            cols::AHLE
        };
        require_columns(
            &raw,
            &[cols::SPECIES, cols::PRODUCTION_SYSTEM, cols::AGE_CLASS, component_col, cols::CAUSE],
            path,
        )?;
        let value_col = if raw.column(cols::PROPORTION).is_ok() {
            cols::PROPORTION
        } else if raw.column(cols::MEAN).is_ok() {
            cols::MEAN
        } else {
            return Err(AhleError::MissingColumn {
                column: cols::PROPORTION.to_string(),
                path: path.to_path_buf(),
            });
        };
        let df = parse_floats(raw, &[value_col.to_string()])?;

        let species = df.column(cols::SPECIES)?.str()?;
        let prodsys = df.column(cols::PRODUCTION_SYSTEM)?.str()?;
        let age = df.column(cols::AGE_CLASS)?.str()?;
        let component = df.column(component_col)?.str()?;
        let cause = df.column(cols::CAUSE)?.str()?;
        let value = df.column(value_col)?.f64()?;

        let mut out = Self::new();
        for i in 0..df.height() {
            let (Some(s), Some(p), Some(a), Some(c), Some(k), Some(v)) = (
                species.get(i),
                prodsys.get(i),
                age.get(i),
                component.get(i),
                cause.get(i),
                value.get(i),
            ) else {
                continue;
            };
            let comp = LossComponent::parse(c)
                .ok_or_else(|| AhleError::InvalidData(format!("unknown component '{c}' in {}", path.display())))?;
            let cause = Cause::parse(k)
                .ok_or_else(|| AhleError::InvalidData(format!("unknown cause '{k}' in {}", path.display())))?;
            if cause == Cause::All {
                continue;
            }
            out.insert(ProportionKey::new(s, p, a, comp), cause, v);
        }

        if value_col == cols::MEAN {
            out.normalize();
        }
        Ok(out)
    }

    /// Scale each key's values to sum to 1. Keys summing to zero are dropped.
    fn normalize(&mut self) {
        self.map.retain(|_, causes| {
            let sum: f64 = causes.values().sum();
            if sum == 0.0 || !sum.is_finite() {
                return false;
            }
            causes.values_mut().for_each(|p| *p /= sum);
            true
        });
    }
}

// ── Segment → attribution key mapping ───────────────────────────────────────

/// Which segments of one species are attributed, and under which labels.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpeciesMapping {
    /// Segment species (e.g. "All Small Ruminants").
    pub species: String,
    /// Group label (e.g. "Juvenile Combined") → expert age class.
    pub age_classes: BTreeMap<String, String>,
    /// Production-system renames; unlisted systems keep their name.
    #[serde(default)]
    pub production_systems: BTreeMap<String, String>,
}

fn map_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

pub fn default_mappings() -> Vec<SpeciesMapping> {
    vec![
        SpeciesMapping {
            species: ALL_SMALL_RUMINANTS.to_string(),
            age_classes: map_of(&[
                ("Adult Female", "Adult female"),
                ("Adult Male", "Adult male"),
                ("Juvenile Combined", "Juvenile"),
                ("Neonatal Combined", "Neonate"),
            ]),
            production_systems: BTreeMap::new(),
        },
        SpeciesMapping {
            species: "Cattle".to_string(),
            age_classes: map_of(&[
                ("Adult Combined", "Adult"),
                ("Juvenile Combined", "Sub-adult"),
                ("Neonatal Combined", "Juvenile"),
                ("Oxen", "Oxen"),
            ]),
            production_systems: map_of(&[("Periurban dairy", "Dairy")]),
        },
        SpeciesMapping {
            species: ALL_POULTRY.to_string(),
            age_classes: map_of(&[
                ("Adult Combined", "Adult"),
                ("Juvenile Combined", "Juvenile"),
                ("Neonatal Combined", "Chick"),
            ]),
            production_systems: BTreeMap::new(),
        },
    ]
}

/// A segment selected for attribution with its expert-table labels.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionCell {
    pub key: SegmentKey,
    pub production_system: String,
    pub age_class: String,
}

impl AttributionCell {
    pub fn proportion_key(&self, component: LossComponent) -> ProportionKey {
        ProportionKey::new(&self.key.species, &self.production_system, &self.age_class, component)
    }
}

/// Segments of the loss table that have an attribution key. The aggregate
/// production system and aggregate age classes are never attributed.
pub fn attribution_cells(table: &LossTable, mappings: &[SpeciesMapping]) -> Vec<AttributionCell> {
    let mut cells = Vec::new();
    for key in table.keys() {
        if segment::is_overall(&key.production_system) {
            continue;
        }
        let Some(mapping) = mappings
            .iter()
            .find(|m| m.species.eq_ignore_ascii_case(key.species.trim()))
        else {
            continue;
        };
        let group = key.group_label();
        let Some(age_class) = lookup_ci(&mapping.age_classes, &group) else {
            continue;
        };
        let production_system = lookup_ci(&mapping.production_systems, &key.production_system)
            .unwrap_or(&key.production_system)
            .clone();
        cells.push(AttributionCell {
            key: key.clone(),
            production_system,
            age_class: age_class.clone(),
        });
    }
    cells
}

fn lookup_ci<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Option<&'a String> {
    map.iter()
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key.trim()))
        .map(|(_, v)| v)
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

// ── Apportioning ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct AttributionSettings {
    /// Share of infectious health cost the known diseases are assumed to explain.
    pub known_disease_coverage: f64,
    pub tolerance: f64,
}

impl Default for AttributionSettings {
    fn default() -> Self {
        Self {
            known_disease_coverage: 0.9,
            tolerance: 1e-6,
        }
    }
}

/// One attributed output value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributedRow {
    pub key: SegmentKey,
    pub age_class: String,
    pub component: LossComponent,
    pub cause: Cause,
    pub disease: DiseaseLabel,
    pub value: Moments,
    pub state: CellState,
    pub flagged: bool,
}

/// Result of apportioning: detail rows plus the final state of every cell.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub rows: Vec<AttributedRow>,
    pub states: BTreeMap<(SegmentKey, LossComponent), CellState>,
}

/// Split every cell's mortality, health cost and production loss across
/// causes, then break infectious loss down by disease.
pub fn apportion(
    table: &LossTable,
    cells: &[AttributionCell],
    proportions: &CauseProportions,
    settings: &AttributionSettings,
    diags: &mut Diagnostics,
) -> Result<Attribution, AhleError> {
    let mut out = Attribution::default();

    for cell in cells {
        let Some(row) = table.get(&cell.key) else {
            continue;
        };
        for component in LossComponent::PARTS {
            let Some(total) = row.get(&LossKey::new(Counterfactual::Current, component)).copied() else {
                continue;
            };
            let mut state = CellState::Unattributed;
            let mut split: Option<BTreeMap<Cause, Moments>> = None;
            // Non-infectious and external placeholders went negative.
            let mut negative_rest = false;

            if component == LossComponent::HealthCost {
                let placeholder = health_cost_placeholder(row, &cell.key, total, settings);
                negative_rest = [Cause::NonInfectious, Cause::External].iter().any(|c| {
                    placeholder
                        .get(c)
                        .is_some_and(|m| m.mean < -settings.tolerance * total.mean.abs().max(1.0))
                });
                split = Some(placeholder);
                state = state.advance(CellState::Placeholder)?;
            }
            if let Some(props) = proportions.lookup(&cell.key, &cell.proportion_key(component)) {
                split = Some(
                    props
                        .iter()
                        .map(|(&cause, &p)| (cause, total.scale(p)))
                        .collect(),
                );
                negative_rest = false;
                state = state.advance(CellState::Finalized)?;
            }
            out.states.insert((cell.key.clone(), component), state);

            let Some(split) = split else {
                continue;
            };
            if negative_rest {
                diags.push(
                    DiagnosticKind::DataQuality,
                    format!("{} [{}]", cell.key, component.name()),
                    format!(
                        "known-disease health cost exceeds the total {}, placeholder remainder is negative",
                        total.mean
                    ),
                );
            }
            for (&cause, &value) in &split {
                out.rows.push(AttributedRow {
                    key: cell.key.clone(),
                    age_class: cell.age_class.clone(),
                    component,
                    cause,
                    disease: DiseaseLabel::for_cause(cause),
                    value,
                    state,
                    flagged: negative_rest && cause != Cause::Infectious,
                });
            }
            if let Some(&infectious) = split.get(&Cause::Infectious) {
                if let Some(other) = other_infectious(row, &cell.key, component, infectious) {
                    let flagged = other.mean < -settings.tolerance * infectious.mean.abs().max(1.0);
                    if flagged {
                        diags.push(
                            DiagnosticKind::DataQuality,
                            format!("{} [{}]", cell.key, component.name()),
                            format!(
                                "known diseases exceed infectious loss, other infectious is {}",
                                other.mean
                            ),
                        );
                    }
                    out.rows.push(AttributedRow {
                        key: cell.key.clone(),
                        age_class: cell.age_class.clone(),
                        component,
                        cause: Cause::Infectious,
                        disease: DiseaseLabel::OtherInfectious,
                        value: other,
                        state,
                        flagged,
                    });
                }
            }
        }
    }

    let finalized = out.states.values().filter(|s| **s == CellState::Finalized).count();
    log::info!(
        "attributed {} cells ({} finalized), {} detail rows",
        out.states.len(),
        finalized,
        out.rows.len()
    );
    Ok(out)
}

/// Sum of the known-disease losses for one component. Inapplicable diseases
/// count as zero; an applicable disease without an estimate makes the sum absent.
pub fn known_disease_loss(
    row: &BTreeMap<LossKey, Moments>,
    key: &SegmentKey,
    component: LossComponent,
) -> Option<Moments> {
    let mut total = Moments::ZERO;
    for d in Disease::ALL {
        if !d.applies_to(&key.species) {
            continue;
        }
        total = total + *row.get(&LossKey::new(Counterfactual::Disease(d), component))?;
    }
    Some(total)
}

/// Infectious loss not explained by the known diseases. Variances add.
fn other_infectious(
    row: &BTreeMap<LossKey, Moments>,
    key: &SegmentKey,
    component: LossComponent,
    infectious: Moments,
) -> Option<Moments> {
    Some(infectious - known_disease_loss(row, key, component)?)
}

/// Health cost has no elicited split. With positive known-disease health
/// cost, infectious is scaled up from the known diseases by the coverage
/// constant and the remainder is halved; otherwise the cost is split evenly.
fn health_cost_placeholder(
    row: &BTreeMap<LossKey, Moments>,
    key: &SegmentKey,
    total: Moments,
    settings: &AttributionSettings,
) -> BTreeMap<Cause, Moments> {
    let evidence = sum_present(Disease::ALL.iter().filter(|d| d.applies_to(&key.species)).map(|&d| {
        row.get(&LossKey::new(Counterfactual::Disease(d), LossComponent::HealthCost))
            .copied()
    }));

    match evidence {
        Some(known) if known.mean > 0.0 && settings.known_disease_coverage > 0.0 => {
            let infectious = known.scale(1.0 / settings.known_disease_coverage);
            let rest = Moments::new(
                (total.mean - infectious.mean) / 2.0,
                (total.variance + infectious.variance) / 4.0,
            );
            BTreeMap::from([
                (Cause::Infectious, infectious),
                (Cause::NonInfectious, rest),
                (Cause::External, rest),
            ])
        }
        _ => {
            let third = total.scale(1.0 / 3.0);
            Cause::ATTRIBUTED.iter().map(|&c| (c, third)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cattle(group: &str) -> SegmentKey {
        SegmentKey::from_group("National", "Cattle", "Periurban dairy", group, 2021)
    }

    fn table_with(key: &SegmentKey, entries: &[(Counterfactual, LossComponent, f64, f64)]) -> LossTable {
        let mut t = LossTable::new();
        let row = t.entry(key.clone()).or_default();
        for &(cf, c, mean, var) in entries {
            row.insert(LossKey::new(cf, c), Moments::new(mean, var));
        }
        t
    }

    #[test]
    fn state_never_moves_backward() {
        assert_eq!(
            CellState::Unattributed.advance(CellState::Placeholder).unwrap(),
            CellState::Placeholder
        );
        assert!(CellState::Finalized.advance(CellState::Placeholder).is_err());
    }

    #[test]
    fn parses_causes() {
        assert_eq!(Cause::parse("Non-infectious"), Some(Cause::NonInfectious));
        assert_eq!(Cause::parse("non_infectious"), Some(Cause::NonInfectious));
        assert_eq!(Cause::parse(" External "), Some(Cause::External));
        assert_eq!(Cause::parse("unknown"), None);
    }

    #[test]
    fn cells_follow_species_mapping() {
        let mut t = LossTable::new();
        for group in ["Adult Combined", "Adult Female", "Oxen", "Overall"] {
            t.insert(cattle(group), BTreeMap::new());
        }
        t.insert(
            SegmentKey::from_group("National", "Cattle", "Overall", "Adult Combined", 2021),
            BTreeMap::new(),
        );
        let cells = attribution_cells(&t, &default_mappings());
        let classes: Vec<&str> = cells.iter().map(|c| c.age_class.as_str()).collect();
        assert_eq!(cells.len(), 2);
        assert!(classes.contains(&"Adult") && classes.contains(&"Oxen"));
        assert!(cells.iter().all(|c| c.production_system == "Dairy"));
    }

    #[test]
    fn splits_by_proportion() {
        let key = cattle("Adult Combined");
        let table = table_with(
            &key,
            &[(Counterfactual::Current, LossComponent::Mortality, 300.0, 100.0)],
        );
        let cells = attribution_cells(&table, &default_mappings());
        let mut props = CauseProportions::new();
        let pk = ProportionKey::new("cattle", "dairy", "adult", LossComponent::Mortality);
        props.insert(pk.clone(), Cause::Infectious, 0.5);
        props.insert(pk.clone(), Cause::NonInfectious, 0.3);
        props.insert(pk, Cause::External, 0.2);

        let mut diags = Diagnostics::new();
        let out = apportion(&table, &cells, &props, &AttributionSettings::default(), &mut diags).unwrap();
        let value = |cause| {
            out.rows
                .iter()
                .find(|r| r.cause == cause && r.disease != DiseaseLabel::OtherInfectious)
                .unwrap()
                .value
        };
        assert_abs_diff_eq!(value(Cause::Infectious).mean, 150.0);
        assert_abs_diff_eq!(value(Cause::NonInfectious).mean, 90.0);
        assert_abs_diff_eq!(value(Cause::External).mean, 60.0);
        assert_abs_diff_eq!(value(Cause::Infectious).variance, 25.0);
        assert_eq!(out.states[&(key, LossComponent::Mortality)], CellState::Finalized);
    }

    #[test]
    fn health_cost_even_split_without_evidence() {
        let key = cattle("Adult Combined");
        let table = table_with(
            &key,
            &[(Counterfactual::Current, LossComponent::HealthCost, 90.0, 81.0)],
        );
        let cells = attribution_cells(&table, &default_mappings());
        let mut diags = Diagnostics::new();
        let out = apportion(&table, &cells, &CauseProportions::new(), &AttributionSettings::default(), &mut diags)
            .unwrap();
        let ext = out.rows.iter().find(|r| r.cause == Cause::External).unwrap();
        assert_abs_diff_eq!(ext.value.mean, 30.0);
        assert_abs_diff_eq!(ext.value.variance, 9.0);
        assert_eq!(ext.disease, DiseaseLabel::AllCauses);
        assert_eq!(ext.state, CellState::Placeholder);
    }

    #[test]
    fn health_cost_uses_known_disease_evidence() {
        let key = cattle("Adult Combined");
        let hc = LossComponent::HealthCost;
        let table = table_with(
            &key,
            &[
                (Counterfactual::Current, hc, 100.0, 10.0),
                (Counterfactual::Disease(Disease::Brucellosis), hc, 18.0, 0.81),
                (Counterfactual::Disease(Disease::Fmd), hc, 27.0, 0.0),
            ],
        );
        let cells = attribution_cells(&table, &default_mappings());
        let mut diags = Diagnostics::new();
        let out = apportion(&table, &cells, &CauseProportions::new(), &AttributionSettings::default(), &mut diags)
            .unwrap();
        let get = |cause, disease| {
            out.rows
                .iter()
                .find(|r| r.cause == cause && r.disease == disease)
                .unwrap()
                .value
        };
        let inf = get(Cause::Infectious, DiseaseLabel::All);
        assert_abs_diff_eq!(inf.mean, 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(inf.variance, 1.0, epsilon = 1e-9);
        let non = get(Cause::NonInfectious, DiseaseLabel::AllConditions);
        assert_abs_diff_eq!(non.mean, 25.0, epsilon = 1e-9);
        assert_abs_diff_eq!(non.variance, 11.0 / 4.0, epsilon = 1e-9);
        let other = get(Cause::Infectious, DiseaseLabel::OtherInfectious);
        assert_abs_diff_eq!(other.mean, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn negative_health_cost_remainder_is_flagged() {
        let key = cattle("Adult Combined");
        let hc = LossComponent::HealthCost;
        let table = table_with(
            &key,
            &[
                (Counterfactual::Current, hc, 100.0, 0.0),
                (Counterfactual::Disease(Disease::Brucellosis), hc, 50.0, 0.0),
                (Counterfactual::Disease(Disease::Fmd), hc, 45.0, 0.0),
            ],
        );
        let cells = attribution_cells(&table, &default_mappings());
        let mut diags = Diagnostics::new();
        let out = apportion(&table, &cells, &CauseProportions::new(), &AttributionSettings::default(), &mut diags)
            .unwrap();

        let rest: Vec<&AttributedRow> = out
            .rows
            .iter()
            .filter(|r| matches!(r.cause, Cause::NonInfectious | Cause::External))
            .collect();
        assert_eq!(rest.len(), 2);
        for r in rest {
            assert_abs_diff_eq!(r.value.mean, (100.0 - 95.0 / 0.9) / 2.0, epsilon = 1e-9);
            assert!(r.flagged);
        }
        let infectious = out
            .rows
            .iter()
            .find(|r| r.cause == Cause::Infectious && r.disease == DiseaseLabel::All)
            .unwrap();
        assert!(!infectious.flagged);
        assert_eq!(diags.of_kind(DiagnosticKind::DataQuality).count(), 1);
    }

    #[test]
    fn negative_other_infectious_is_flagged_not_clipped() {
        let key = cattle("Adult Combined");
        let m = LossComponent::Mortality;
        let table = table_with(
            &key,
            &[
                (Counterfactual::Current, m, 100.0, 0.0),
                (Counterfactual::Disease(Disease::Brucellosis), m, 40.0, 0.0),
                (Counterfactual::Disease(Disease::Fmd), m, 30.0, 0.0),
            ],
        );
        let cells = attribution_cells(&table, &default_mappings());
        let mut props = CauseProportions::new();
        let pk = ProportionKey::new("Cattle", "Dairy", "Adult", m);
        props.insert(pk.clone(), Cause::Infectious, 0.5);
        props.insert(pk, Cause::NonInfectious, 0.5);

        let mut diags = Diagnostics::new();
        let out = apportion(&table, &cells, &props, &AttributionSettings::default(), &mut diags).unwrap();
        let other = out
            .rows
            .iter()
            .find(|r| r.disease == DiseaseLabel::OtherInfectious)
            .unwrap();
        assert_abs_diff_eq!(other.value.mean, -20.0);
        assert!(other.flagged);
        assert_eq!(diags.of_kind(DiagnosticKind::DataQuality).count(), 1);
    }

    #[test]
    fn scoped_proportions_win_for_their_region() {
        let mut table = LossTable::new();
        for region in ["Afar", "Amhara"] {
            let key = SegmentKey::from_group(region, "Cattle", "Pastoral", "Adult Combined", 2021);
            table.entry(key).or_default().insert(
                LossKey::new(Counterfactual::Current, LossComponent::Mortality),
                Moments::exact(100.0),
            );
        }
        let cells = attribution_cells(&table, &default_mappings());
        let split = |infectious: f64| {
            let mut p = CauseProportions::new();
            let pk = ProportionKey::new("Cattle", "Pastoral", "Adult", LossComponent::Mortality);
            p.insert(pk.clone(), Cause::Infectious, infectious);
            p.insert(pk, Cause::External, 1.0 - infectious);
            p
        };
        let mut props = split(0.5);
        props.insert_scoped("Afar", 2021, split(0.9));
        assert_eq!(props.len(), 2);

        let mut diags = Diagnostics::new();
        let out = apportion(&table, &cells, &props, &AttributionSettings::default(), &mut diags).unwrap();
        let infectious = |region: &str| {
            out.rows
                .iter()
                .find(|r| r.key.region == region && r.cause == Cause::Infectious)
                .unwrap()
                .value
                .mean
        };
        assert_abs_diff_eq!(infectious("Afar"), 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(infectious("Amhara"), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn loads_and_validates_proportions() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "Species,Production system,Age class,Component,Cause,Proportion").unwrap();
        writeln!(f, "Cattle,Dairy,Adult,Mortality,Infectious,0.5").unwrap();
        writeln!(f, "Cattle,Dairy,Adult,Mortality,Non-infectious,0.3").unwrap();
        writeln!(f, "Cattle,Dairy,Adult,Mortality,External,0.2").unwrap();
        writeln!(f, "Cattle,Dairy,Oxen,Mortality,Infectious,0.7").unwrap();
        let props = CauseProportions::load(f.path()).unwrap();
        assert_eq!(props.len(), 2);
        let mut diags = Diagnostics::new();
        assert_eq!(props.validate(1e-6, &mut diags), 1);
    }

    #[test]
    fn normalizes_means_to_proportions() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "species,production_system,age_class,ahle,cause,mean,sd").unwrap();
        writeln!(f, "Cattle,Dairy,Adult,Production loss,Infectious,60,1").unwrap();
        writeln!(f, "Cattle,Dairy,Adult,Production loss,External,40,1").unwrap();
        let props = CauseProportions::load(f.path()).unwrap();
        let pk = ProportionKey::new("Cattle", "Dairy", "Adult", LossComponent::ProductionLoss);
        assert_abs_diff_eq!(props.get(&pk).unwrap()[&Cause::Infectious], 0.6);
    }
}
