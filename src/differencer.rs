//! Counterfactual differencing: loss components per segment.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::hierarchy::MeasureTable;
use crate::moments::{difference, relative_gap, FillPolicy, Moments};
use crate::segment::{self, SegmentKey};
use crate::store::{item, scenario, ScenarioStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LossComponent {
    Total,
    Mortality,
    HealthCost,
    ProductionLoss,
}

impl LossComponent {
    pub const PARTS: [LossComponent; 3] = [
        LossComponent::Mortality,
        LossComponent::HealthCost,
        LossComponent::ProductionLoss,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LossComponent::Total => "total",
            LossComponent::Mortality => "mortality",
            LossComponent::HealthCost => "health_cost",
            LossComponent::ProductionLoss => "production_loss",
        }
    }

    /// Label used by the expert attribution tables.
    pub fn label(self) -> &'static str {
        match self {
            LossComponent::Total => "Total",
            LossComponent::Mortality => "Mortality",
            LossComponent::HealthCost => "Health cost",
            LossComponent::ProductionLoss => "Production loss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "total" | "ahle" => Some(LossComponent::Total),
            "mortality" => Some(LossComponent::Mortality),
            "health_cost" | "healthcost" => Some(LossComponent::HealthCost),
            "production_loss" | "productionloss" | "production" => Some(LossComponent::ProductionLoss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Disease {
    Ppr,
    Brucellosis,
    Fmd,
}

impl Disease {
    pub const ALL: [Disease; 3] = [Disease::Ppr, Disease::Brucellosis, Disease::Fmd];

    pub fn scenario(self) -> &'static str {
        match self {
            Disease::Ppr => scenario::PPR,
            Disease::Brucellosis => scenario::BRUC,
            Disease::Fmd => scenario::FMD,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Disease::Ppr => "PPR",
            Disease::Brucellosis => "Brucellosis",
            Disease::Fmd => "FMD",
        }
    }

    /// Whether the disease occurs in `species` at all.
    pub fn applies_to(self, species: &str) -> bool {
        match self {
            Disease::Ppr => segment::is_small_ruminant(species),
            Disease::Brucellosis => segment::is_small_ruminant(species) || segment::is_cattle(species),
            Disease::Fmd => segment::is_cattle(species),
        }
    }
}

/// The scenario compared against `ideal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counterfactual {
    /// Current conditions: the full loss envelope.
    Current,
    /// Only the named disease removed.
    Disease(Disease),
}

impl Counterfactual {
    pub const ALL: [Counterfactual; 4] = [
        Counterfactual::Current,
        Counterfactual::Disease(Disease::Ppr),
        Counterfactual::Disease(Disease::Brucellosis),
        Counterfactual::Disease(Disease::Fmd),
    ];

    pub fn scenario(self) -> &'static str {
        match self {
            Counterfactual::Current => scenario::CURRENT,
            Counterfactual::Disease(d) => d.scenario(),
        }
    }
}

impl fmt::Display for Counterfactual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scenario())
    }
}

/// Measure key of the loss table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LossKey {
    pub counterfactual: Counterfactual,
    pub component: LossComponent,
}

impl LossKey {
    pub fn new(counterfactual: Counterfactual, component: LossComponent) -> Self {
        Self {
            counterfactual,
            component,
        }
    }
}

pub type LossTable = MeasureTable<LossKey>;

/// The four components of one segment under one counterfactual.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossComponents {
    pub total: Option<Moments>,
    pub mortality: Option<Moments>,
    pub health_cost: Option<Moments>,
    pub production_loss: Option<Moments>,
}

impl LossComponents {
    pub fn zero() -> Self {
        Self {
            total: Some(Moments::ZERO),
            mortality: Some(Moments::ZERO),
            health_cost: Some(Moments::ZERO),
            production_loss: Some(Moments::ZERO),
        }
    }

    pub fn get(&self, component: LossComponent) -> Option<Moments> {
        match component {
            LossComponent::Total => self.total,
            LossComponent::Mortality => self.mortality,
            LossComponent::HealthCost => self.health_cost,
            LossComponent::ProductionLoss => self.production_loss,
        }
    }
}

/// Mortality loss valued at the current value per head.
///
/// `value_per_head = value_of_herd_increase / cml_pop_growth` is held fixed,
/// so `Var = vph² · Var(total_mortality)`. Zero mortality means zero loss
/// whatever the ratio; any other zero growth is a data-quality error.
pub fn mortality_loss(
    store: &ScenarioStore,
    key: &SegmentKey,
    scenario_name: &str,
    diags: &mut Diagnostics,
) -> Option<Moments> {
    let tm = store.moments(key, scenario_name, item::TOTAL_MORTALITY)?;
    if tm.mean == 0.0 {
        return Some(Moments::ZERO);
    }
    let vhi = store.moments(key, scenario_name, item::VALUE_OF_HERD_INCREASE)?;
    let cpg = store.moments(key, scenario_name, item::CML_POP_GROWTH)?;
    if cpg.mean == 0.0 {
        diags.push(
            DiagnosticKind::ZeroDenominator,
            format!("{key} [{scenario_name}]"),
            "cml pop growth is zero with non-zero mortality, value per head undefined",
        );
        return None;
    }
    let value_per_head = vhi.mean / cpg.mean;
    Some(tm.scale(value_per_head))
}

/// Loss components of one segment against `ideal`.
pub fn difference_segment(
    store: &ScenarioStore,
    key: &SegmentKey,
    cf: Counterfactual,
    diags: &mut Diagnostics,
) -> LossComponents {
    if let Counterfactual::Disease(d) = cf {
        if !d.applies_to(&key.species) {
            return LossComponents::zero();
        }
    }
    let scen = cf.scenario();

    let total = difference(
        store.moments(key, scenario::IDEAL, item::GROSS_MARGIN),
        store.moments(key, scen, item::GROSS_MARGIN),
        FillPolicy::Propagate,
    );
    let mortality = mortality_loss(store, key, scen, diags);
    // Costs are stored negative; the loss is the positive amount.
    let health_cost = store.moments(key, scen, item::HEALTH_COST).map(|m| -m);
    let production_loss = residual(total, mortality, health_cost);

    LossComponents {
        total,
        mortality,
        health_cost,
        production_loss,
    }
}

/// `total − mortality − health_cost`, absent if any input is.
pub fn residual(
    total: Option<Moments>,
    mortality: Option<Moments>,
    health_cost: Option<Moments>,
) -> Option<Moments> {
    Some(total? - mortality? - health_cost?)
}

/// Difference every segment of the store under every counterfactual.
pub fn difference_all(
    store: &ScenarioStore,
    counterfactuals: &[Counterfactual],
    diags: &mut Diagnostics,
) -> LossTable {
    let mut table = LossTable::new();
    for key in store.segments() {
        let row = table.entry(key.clone()).or_default();
        for &cf in counterfactuals {
            let parts = difference_segment(store, key, cf, diags);
            for component in [LossComponent::Total]
                .into_iter()
                .chain(LossComponent::PARTS)
            {
                if let Some(m) = parts.get(component) {
                    row.insert(LossKey::new(cf, component), m);
                }
            }
        }
    }
    table.retain(|_, row| !row.is_empty());
    log::info!("differenced {} segments", table.len());
    table
}

/// Re-derive production loss as the residual wherever the other three
/// components are present. Used after roll-up so the sum holds at every level.
pub fn rederive_residuals(mut table: LossTable) -> LossTable {
    for row in table.values_mut() {
        let cfs: BTreeSet<Counterfactual> = row.keys().map(|k| k.counterfactual).collect();
        for cf in cfs {
            let get = |c| row.get(&LossKey::new(cf, c)).copied();
            if let Some(pl) = residual(
                get(LossComponent::Total),
                get(LossComponent::Mortality),
                get(LossComponent::HealthCost),
            ) {
                row.insert(LossKey::new(cf, LossComponent::ProductionLoss), pl);
            }
        }
    }
    table
}

/// Force inapplicable disease rows to exact zero. Roll-up rows for a species
/// group inherit zeros from their members; this covers groups whose members
/// were all absent.
pub fn zero_inapplicable(mut table: LossTable) -> LossTable {
    for (key, row) in table.iter_mut() {
        for d in Disease::ALL {
            if d.applies_to(&key.species) {
                continue;
            }
            let cf = Counterfactual::Disease(d);
            for component in [LossComponent::Total].into_iter().chain(LossComponent::PARTS) {
                row.insert(LossKey::new(cf, component), Moments::ZERO);
            }
        }
    }
    table
}

/// Check `total = mortality + health_cost + production_loss` on every row.
/// Returns the violating rows; each is also reported.
pub fn check_sum_consistency(
    table: &LossTable,
    tolerance: f64,
    diags: &mut Diagnostics,
) -> BTreeSet<(SegmentKey, Counterfactual)> {
    let mut violations = BTreeSet::new();
    for (key, row) in table {
        for cf in Counterfactual::ALL {
            let get = |c| row.get(&LossKey::new(cf, c)).map(|m| m.mean);
            let (Some(total), Some(m), Some(h), Some(p)) = (
                get(LossComponent::Total),
                get(LossComponent::Mortality),
                get(LossComponent::HealthCost),
                get(LossComponent::ProductionLoss),
            ) else {
                continue;
            };
            let gap = relative_gap(total, m + h + p);
            if gap > tolerance {
                violations.insert((key.clone(), cf));
                diags.push(
                    DiagnosticKind::ConsistencyViolation,
                    format!("{key} [{cf}]"),
                    format!("components sum to {} but total is {total} (relative gap {gap:.3e})", m + h + p),
                );
            }
        }
    }
    violations
}

// ── Partial scenarios ───────────────────────────────────────────────────────

/// Individual age/sex ideal scenarios whose deltas are compared with the total.
pub const INDIVIDUAL_IDEALS: [&str; 7] = [
    "ideal_af", "ideal_am", "ideal_jf", "ideal_jm", "ideal_nf", "ideal_nm", "ideal_o",
];

/// `gross_margin(scenario) − gross_margin(current)` for every partial scenario.
pub fn scenario_deltas(store: &ScenarioStore, scenarios: &[String]) -> MeasureTable<String> {
    let mut table: MeasureTable<String> = BTreeMap::new();
    for key in store.segments() {
        let current = store.moments(key, scenario::CURRENT, item::GROSS_MARGIN);
        let mut row = BTreeMap::new();
        for s in scenarios {
            let s = scenario::canonical(s);
            let other = store.moments(key, &s, item::GROSS_MARGIN);
            if let Some(delta) = difference(other, current, FillPolicy::Propagate) {
                row.insert(s, delta);
            }
        }
        if !row.is_empty() {
            table.insert(key.clone(), row);
        }
    }
    table
}

/// Log how much of the overall loss the individual age/sex ideals explain,
/// per species / production system. Interactions mean this need not be 1.
pub fn log_partial_coverage(deltas: &MeasureTable<String>, losses: &LossTable) {
    let total_key = LossKey::new(Counterfactual::Current, LossComponent::Total);
    for (key, row) in deltas {
        if !(segment::is_overall(&key.age_group) && segment::is_overall(&key.sex)) {
            continue;
        }
        let Some(total) = losses.get(key).and_then(|r| r.get(&total_key)) else {
            continue;
        };
        let parts: f64 = INDIVIDUAL_IDEALS
            .iter()
            .filter_map(|s| row.get(*s))
            .map(|m| m.mean)
            .sum();
        if total.mean != 0.0 {
            log::info!(
                "{key}: individual ideal scenarios explain {:.3} of total loss",
                parts / total.mean
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moments::Estimate;
    use crate::store::ScenarioRecord;
    use approx::assert_abs_diff_eq;

    fn rec(key: &SegmentKey, scen: &str, item: &str, mean: f64, sd: f64) -> ScenarioRecord {
        ScenarioRecord {
            key: key.clone(),
            scenario: scen.into(),
            item: item.into(),
            estimate: Estimate::new(mean, sd),
        }
    }

    fn goat() -> SegmentKey {
        SegmentKey::from_group("National", "Goat", "Pastoral", "Adult Female", 2021)
    }

    fn store_for(key: &SegmentKey, cpg: f64, tm: f64) -> ScenarioStore {
        ScenarioStore::from_records([
            rec(key, "ideal", "Gross Margin", 1400.0, 30.0),
            rec(key, "current", "Gross Margin", 1000.0, 40.0),
            rec(key, "current", "Total Mortality", tm, 2.0),
            rec(key, "current", "Value of Herd Increase", 2000.0, 0.0),
            rec(key, "current", "Cml Pop Growth", cpg, 0.0),
            rec(key, "current", "Health Cost", -50.0, 5.0),
        ])
    }

    #[test]
    fn total_is_gross_margin_gap() {
        let key = goat();
        let mut diags = Diagnostics::new();
        let parts = difference_segment(&store_for(&key, 100.0, 50.0), &key, Counterfactual::Current, &mut diags);
        assert_abs_diff_eq!(parts.total.unwrap().mean, 400.0);
        assert_abs_diff_eq!(parts.total.unwrap().stdev(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn mortality_uses_value_per_head() {
        let key = goat();
        let mut diags = Diagnostics::new();
        let parts = difference_segment(&store_for(&key, 100.0, 50.0), &key, Counterfactual::Current, &mut diags);
        let mortality = parts.mortality.unwrap();
        assert_abs_diff_eq!(mortality.mean, 1000.0);
        // vph = 20, Var = 20² · 2²
        assert_abs_diff_eq!(mortality.variance, 1600.0);
        assert_abs_diff_eq!(parts.health_cost.unwrap().mean, 50.0);
        let pl = parts.production_loss.unwrap();
        assert_abs_diff_eq!(pl.mean, 400.0 - 1000.0 - 50.0);
        assert_abs_diff_eq!(pl.variance, 2500.0 + 1600.0 + 25.0);
    }

    #[test]
    fn zero_mortality_overrides_zero_growth() {
        let key = goat();
        let mut diags = Diagnostics::new();
        let parts = difference_segment(&store_for(&key, 0.0, 0.0), &key, Counterfactual::Current, &mut diags);
        assert_eq!(parts.mortality, Some(Moments::ZERO));
        assert!(diags.is_empty());
    }

    #[test]
    fn zero_growth_with_mortality_is_reported() {
        let key = goat();
        let mut diags = Diagnostics::new();
        let parts = difference_segment(&store_for(&key, 0.0, 5.0), &key, Counterfactual::Current, &mut diags);
        assert_eq!(parts.mortality, None);
        assert_eq!(parts.production_loss, None);
        assert_eq!(diags.of_kind(DiagnosticKind::ZeroDenominator).count(), 1);
    }

    #[test]
    fn inapplicable_diseases_are_exact_zero() {
        let key = SegmentKey::from_group("National", "Poultry indigenous", "Village", "Adult Combined", 2021);
        let mut diags = Diagnostics::new();
        let store = store_for(&key, 100.0, 50.0);
        for d in [Disease::Ppr, Disease::Brucellosis, Disease::Fmd] {
            let parts = difference_segment(&store, &key, Counterfactual::Disease(d), &mut diags);
            assert_eq!(parts, LossComponents::zero());
        }
    }

    #[test]
    fn applicable_disease_without_scenario_is_absent() {
        let key = goat();
        let mut diags = Diagnostics::new();
        let parts = difference_segment(&store_for(&key, 100.0, 50.0), &key, Counterfactual::Disease(Disease::Ppr), &mut diags);
        assert_eq!(parts.total, None);
    }

    #[test]
    fn difference_all_is_sum_consistent() {
        let key = goat();
        let mut diags = Diagnostics::new();
        let table = difference_all(&store_for(&key, 100.0, 50.0), &Counterfactual::ALL, &mut diags);
        assert!(check_sum_consistency(&table, 1e-6, &mut diags).is_empty());
        // FMD does not apply to goats
        let fmd = LossKey::new(Counterfactual::Disease(Disease::Fmd), LossComponent::Total);
        assert_eq!(table[&key][&fmd], Moments::ZERO);
    }

    #[test]
    fn partial_deltas() {
        let key = goat();
        let store = ScenarioStore::from_records([
            rec(&key, "current", "Gross Margin", 1000.0, 3.0),
            rec(&key, "ideal_af", "Gross Margin", 1100.0, 4.0),
        ]);
        let deltas = scenario_deltas(&store, &["ideal_AF".to_string(), "ideal_am".to_string()]);
        let row = &deltas[&key];
        assert_eq!(row.len(), 1);
        assert_abs_diff_eq!(row["ideal_af"].mean, 100.0);
        assert_abs_diff_eq!(row["ideal_af"].stdev(), 5.0, epsilon = 1e-9);
    }
}
