use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::AhleError;
use crate::moments::{sum_present, Moments};
use crate::segment::{self, Dimension, SegmentKey, OVERALL, OXEN};

/// Per-segment measures. An absent measure is simply not in the inner map.
pub type MeasureTable<K> = BTreeMap<SegmentKey, BTreeMap<K, Moments>>;

/// One roll-up step of the segment hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RollupStage {
    /// Female + Male → "{age} Combined", never for Oxen.
    SexWithinAge,
    /// All ages → "Overall {sex}".
    AgeWithinSex,
    /// All age/sex leaves → "Overall".
    AgeSexTotal,
    ProductionSystem,
    /// Sheep + Goat → All Small Ruminants, poultry → All Poultry.
    SpeciesGroup,
    /// Every other region → `label`.
    Region { label: String },
}

impl RollupStage {
    pub fn name(&self) -> &'static str {
        match self {
            RollupStage::SexWithinAge => "sex_within_age",
            RollupStage::AgeWithinSex => "age_within_sex",
            RollupStage::AgeSexTotal => "age_sex_total",
            RollupStage::ProductionSystem => "production_system",
            RollupStage::SpeciesGroup => "species_group",
            RollupStage::Region { .. } => "region",
        }
    }

    /// Key of the roll-up row a member contributes to, or `None` when `key`
    /// is not a member of this stage.
    pub fn target(&self, key: &SegmentKey) -> Option<SegmentKey> {
        match self {
            RollupStage::SexWithinAge => {
                let leaf = key.is_leaf_on(Dimension::AgeGroup)
                    && key.is_leaf_on(Dimension::Sex)
                    && !key.age_group.eq_ignore_ascii_case(OXEN);
                leaf.then(|| key.with(Dimension::Sex, OVERALL))
            }
            RollupStage::AgeWithinSex => {
                let leaf = key.is_leaf_on(Dimension::AgeGroup) && key.is_leaf_on(Dimension::Sex);
                leaf.then(|| key.with(Dimension::AgeGroup, OVERALL))
            }
            RollupStage::AgeSexTotal => {
                let leaf = key.is_leaf_on(Dimension::AgeGroup) && key.is_leaf_on(Dimension::Sex);
                leaf.then(|| {
                    key.with(Dimension::AgeGroup, OVERALL)
                        .with(Dimension::Sex, OVERALL)
                })
            }
            RollupStage::ProductionSystem => key
                .is_leaf_on(Dimension::ProductionSystem)
                .then(|| key.with(Dimension::ProductionSystem, OVERALL)),
            RollupStage::SpeciesGroup => {
                segment::species_group(&key.species).map(|g| key.with(Dimension::Species, g))
            }
            RollupStage::Region { label } => (!key.region.eq_ignore_ascii_case(label))
                .then(|| key.with(Dimension::Region, label)),
        }
    }
}

/// Dependency graph of roll-up stages. An edge `a → b` means `b` consumes
/// rows produced by `a`.
pub struct RollupPlan {
    graph: DiGraph<RollupStage, ()>,
    /// Map from stage → NodeIndex for fast lookup.
    node_map: HashMap<RollupStage, NodeIndex>,
}

impl RollupPlan {
    pub fn empty() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Sex and age first, then production system, then species groups, then
    /// (optionally) region.
    pub fn standard(region_label: Option<&str>) -> Self {
        let mut plan = Self::empty();
        for demographic in [
            RollupStage::SexWithinAge,
            RollupStage::AgeWithinSex,
            RollupStage::AgeSexTotal,
        ] {
            plan.add_dependency(demographic, RollupStage::ProductionSystem);
        }
        plan.add_dependency(RollupStage::ProductionSystem, RollupStage::SpeciesGroup);
        if let Some(label) = region_label {
            let region = RollupStage::Region {
                label: label.to_string(),
            };
            plan.add_dependency(RollupStage::SpeciesGroup, region.clone());
            plan.add_dependency(RollupStage::ProductionSystem, region);
        }
        plan
    }

    pub fn add_stage(&mut self, stage: RollupStage) -> NodeIndex {
        let graph = &mut self.graph;
        *self
            .node_map
            .entry(stage.clone())
            .or_insert_with(|| graph.add_node(stage))
    }

    /// Declare that `after` must run once `before` has produced its rows.
    pub fn add_dependency(&mut self, before: RollupStage, after: RollupStage) {
        let a = self.add_stage(before);
        let b = self.add_stage(after);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }

    /// Stages in execution order.
    pub fn order(&self) -> Result<Vec<RollupStage>, AhleError> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            AhleError::Config(format!(
                "roll-up stages form a cycle at '{}'",
                self.graph[cycle.node_id()].name()
            ))
        })?;
        Ok(sorted.into_iter().map(|i| self.graph[i].clone()).collect())
    }
}

/// Add roll-up rows to `table`, one stage at a time in plan order.
///
/// Members are summed count-aware per measure. A cell already present in the
/// table (a source aggregate, or an earlier stage) is never overwritten.
pub fn roll_up<K>(table: &MeasureTable<K>, plan: &RollupPlan) -> Result<MeasureTable<K>, AhleError>
where
    K: Ord + Clone,
{
    let mut out = table.clone();
    for stage in plan.order()? {
        let added = apply_stage(&mut out, &stage);
        log::debug!("roll-up stage {}: {} cells added", stage.name(), added);
    }
    Ok(out)
}

/// Run a single stage in place. Returns how many cells were added.
pub fn apply_stage<K>(table: &mut MeasureTable<K>, stage: &RollupStage) -> usize
where
    K: Ord + Clone,
{
    let mut groups: BTreeMap<SegmentKey, Vec<&SegmentKey>> = BTreeMap::new();
    for key in table.keys() {
        if let Some(target) = stage.target(key) {
            groups.entry(target).or_default().push(key);
        }
    }

    let mut sums: Vec<(SegmentKey, BTreeMap<K, Moments>)> = Vec::new();
    for (target, members) in &groups {
        let measures: std::collections::BTreeSet<&K> =
            members.iter().flat_map(|m| table[*m].keys()).collect();
        let mut row = BTreeMap::new();
        for measure in measures {
            let total = sum_present(members.iter().map(|m| table[*m].get(measure).copied()));
            if let Some(total) = total {
                row.insert(measure.clone(), total);
            }
        }
        sums.push((target.clone(), row));
    }

    let mut added = 0;
    for (target, row) in sums {
        let existing = table.entry(target).or_default();
        for (measure, value) in row {
            if let std::collections::btree_map::Entry::Vacant(slot) = existing.entry(measure) {
                slot.insert(value);
                added += 1;
            }
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn key(species: &str, ps: &str, group: &str) -> SegmentKey {
        SegmentKey::from_group("National", species, ps, group, 2021)
    }

    fn leaf_table() -> MeasureTable<&'static str> {
        let mut t = MeasureTable::new();
        for (group, gm) in [
            ("Adult Female", 100.0),
            ("Adult Male", 50.0),
            ("Juvenile Female", 20.0),
            ("Juvenile Male", 10.0),
            ("Oxen", 5.0),
        ] {
            t.entry(key("Cattle", "Pastoral", group))
                .or_default()
                .insert("gm", Moments::new(gm, 1.0));
        }
        t
    }

    #[test]
    fn standard_plan_orders_dependencies() {
        let order = RollupPlan::standard(Some("National")).order().unwrap();
        let pos = |s: &RollupStage| order.iter().position(|o| o == s).unwrap();
        assert!(pos(&RollupStage::SexWithinAge) < pos(&RollupStage::ProductionSystem));
        assert!(pos(&RollupStage::AgeSexTotal) < pos(&RollupStage::ProductionSystem));
        assert!(pos(&RollupStage::ProductionSystem) < pos(&RollupStage::SpeciesGroup));
        assert_eq!(order.len(), 6);
    }

    #[test]
    fn cycle_is_a_config_error() {
        let mut plan = RollupPlan::empty();
        plan.add_dependency(RollupStage::SpeciesGroup, RollupStage::ProductionSystem);
        plan.add_dependency(RollupStage::ProductionSystem, RollupStage::SpeciesGroup);
        assert!(matches!(plan.order(), Err(AhleError::Config(_))));
    }

    #[test]
    fn age_sex_roll_ups() {
        let out = roll_up(&leaf_table(), &RollupPlan::standard(None)).unwrap();

        let adult = &out[&key("Cattle", "Pastoral", "Adult Combined")]["gm"];
        assert_abs_diff_eq!(adult.mean, 150.0);
        assert_abs_diff_eq!(adult.variance, 2.0);

        let overall_male = &out[&key("Cattle", "Pastoral", "Overall Male")]["gm"];
        assert_abs_diff_eq!(overall_male.mean, 65.0);

        let total = &out[&key("Cattle", "Pastoral", "Overall")]["gm"];
        assert_abs_diff_eq!(total.mean, 185.0);
        assert_abs_diff_eq!(total.variance, 5.0);

        assert!(!out.contains_key(&key("Cattle", "Pastoral", "Oxen Combined")));
        assert!(out.contains_key(&key("Cattle", "Overall", "Overall")));
        assert!(!out.keys().any(|k| k.species == segment::ALL_SMALL_RUMINANTS));
    }

    #[test]
    fn source_aggregates_take_precedence() {
        let mut t = leaf_table();
        t.entry(key("Cattle", "Pastoral", "Overall"))
            .or_default()
            .insert("gm", Moments::new(999.0, 0.0));
        let out = roll_up(&t, &RollupPlan::standard(None)).unwrap();
        assert_abs_diff_eq!(out[&key("Cattle", "Pastoral", "Overall")]["gm"].mean, 999.0);
        assert_abs_diff_eq!(out[&key("Cattle", "Overall", "Overall")]["gm"].mean, 999.0);
    }

    #[test]
    fn species_groups_roll_up() {
        let mut t = MeasureTable::new();
        t.entry(key("Sheep", "Pastoral", "Overall")).or_default().insert("gm", Moments::exact(10.0));
        t.entry(key("Goat", "Pastoral", "Overall")).or_default().insert("gm", Moments::exact(5.0));
        t.entry(key("Goat", "Crop livestock mixed", "Overall"))
            .or_default()
            .insert("gm", Moments::exact(1.0));
        let out = roll_up(&t, &RollupPlan::standard(None)).unwrap();
        let sr = |ps: &str| out[&key(segment::ALL_SMALL_RUMINANTS, ps, "Overall")]["gm"].mean;
        assert_abs_diff_eq!(sr("Pastoral"), 15.0);
        assert_abs_diff_eq!(sr("Overall"), 16.0);
    }

    #[test]
    fn absent_members_are_skipped() {
        let mut t = MeasureTable::new();
        t.entry(key("Goat", "Pastoral", "Adult Female")).or_default().insert("gm", Moments::exact(3.0));
        t.entry(key("Goat", "Pastoral", "Adult Male")).or_default().insert("hc", Moments::exact(1.0));
        let out = roll_up(&t, &RollupPlan::standard(None)).unwrap();
        let row = &out[&key("Goat", "Pastoral", "Adult Combined")];
        assert_abs_diff_eq!(row["gm"].mean, 3.0);
        assert_abs_diff_eq!(row["hc"].mean, 1.0);
    }
}
