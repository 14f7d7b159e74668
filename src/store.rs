use std::collections::{BTreeMap, BTreeSet};

use crate::hierarchy::MeasureTable;
use crate::moments::{Estimate, Moments};
use crate::segment::SegmentKey;

// ── Scenario names ──────────────────────────────────────────────────────────
pub mod scenario {
    pub const CURRENT: &str = "current";
    pub const IDEAL: &str = "ideal";
    pub const PPR: &str = "ppr";
    pub const BRUC: &str = "bruc";
    pub const FMD: &str = "fmd";
    pub const MORTALITY_ZERO: &str = "mortality_zero";

    /// Lower-case, trimmed scenario name with the legacy
    /// `all_mortality_zero` spelling folded into `mortality_zero`.
    pub fn canonical(name: &str) -> String {
        let name = name.trim().to_ascii_lowercase();
        match name.strip_prefix("all_") {
            Some(rest) if rest.starts_with(MORTALITY_ZERO) => rest.to_string(),
            _ => name,
        }
    }
}

// ── Item names (canonical, lower case) ──────────────────────────────────────
pub mod item {
    pub const GROSS_MARGIN: &str = "gross margin";
    pub const TOTAL_MORTALITY: &str = "total mortality";
    pub const VALUE_OF_HERD_INCREASE: &str = "value of herd increase";
    pub const CML_POP_GROWTH: &str = "cml pop growth";
    pub const HEALTH_COST: &str = "health cost";
    pub const POPULATION_LIVEWEIGHT: &str = "population liveweight (kg)";

    /// Trimmed, lower-cased, whitespace-collapsed item name.
    pub fn canonical(name: &str) -> String {
        name.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase()
    }
}

/// Physical quantity, monetary value or monetary cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    PhysicalQuantity,
    MonetaryValue,
    MonetaryCost,
}

const PHYSICAL_ITEMS: &[&str] = &[
    "num offtake",
    "cml pop growth",
    "total number increase",
    "total mortality",
    "population liveweight (kg)",
    "offtake liveweight (kg)",
    "meat (kg)",
    "manure",
    "hides",
    "milk",
    "wool",
    "cml dry matter",
    "eggs sold",
    "eggs consumed",
];

const VALUE_ITEMS: &[&str] = &[
    "value of offtake",
    "value of herd increase",
    "value of herd increase plus offtake",
    "value of manure",
    "value of hides",
    "value of milk",
    "total production value",
    "gross margin",
    "value of draught",
    "value of eggs sold",
    "value of eggs consumed",
];

const COST_ITEMS: &[&str] = &[
    "feed cost",
    "labour cost",
    "health cost",
    "capital cost",
    "value of total mortality",
    "infrastructure cost",
    "total expenditure",
];

impl ItemType {
    /// Classify a simulator item. Unknown items return `None`.
    pub fn classify(name: &str) -> Option<ItemType> {
        let name = item::canonical(name);
        if COST_ITEMS.contains(&name.as_str()) {
            Some(ItemType::MonetaryCost)
        } else if VALUE_ITEMS.contains(&name.as_str()) {
            Some(ItemType::MonetaryValue)
        } else if PHYSICAL_ITEMS.contains(&name.as_str()) {
            Some(ItemType::PhysicalQuantity)
        } else {
            None
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ItemType::PhysicalQuantity => "pq",
            ItemType::MonetaryValue => "mv",
            ItemType::MonetaryCost => "mc",
        }
    }

    pub fn is_currency(self) -> bool {
        !matches!(self, ItemType::PhysicalQuantity)
    }
}

/// Column key of the store: one simulator statistic under one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub scenario: String,
    pub item: String,
}

impl CellId {
    pub fn new(scenario: &str, item: &str) -> Self {
        Self {
            scenario: scenario::canonical(scenario),
            item: item::canonical(item),
        }
    }
}

/// One loaded estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRecord {
    pub key: SegmentKey,
    pub scenario: String,
    pub item: String,
    pub estimate: Estimate,
}

/// Long-form `(segment, scenario, item) → (mean, stdev)` store.
///
/// Read-only once built. A combination that was never loaded is reported as
/// `None`, never as zero.
#[derive(Debug, Clone, Default)]
pub struct ScenarioStore {
    cells: MeasureTable<CellId>,
}

impl ScenarioStore {
    /// Build from records; the first record for a cell wins.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ScenarioRecord>,
    {
        let mut cells: MeasureTable<CellId> = BTreeMap::new();
        for rec in records {
            let id = CellId::new(&rec.scenario, &rec.item);
            let row = cells.entry(rec.key).or_default();
            if row.contains_key(&id) {
                log::debug!("duplicate cell {}/{} ignored", id.scenario, id.item);
                continue;
            }
            row.insert(id, rec.estimate.moments());
        }
        Self { cells }
    }

    pub fn from_table(cells: MeasureTable<CellId>) -> Self {
        Self { cells }
    }

    pub fn table(&self) -> &MeasureTable<CellId> {
        &self.cells
    }

    pub fn get(&self, key: &SegmentKey, scenario: &str, item: &str) -> Option<Estimate> {
        self.moments(key, scenario, item).map(Moments::estimate)
    }

    pub fn moments(&self, key: &SegmentKey, scenario: &str, item: &str) -> Option<Moments> {
        self.cells
            .get(key)?
            .get(&CellId::new(scenario, item))
            .copied()
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentKey> {
        self.cells.keys()
    }

    pub fn cells_of(&self, key: &SegmentKey) -> Option<&BTreeMap<CellId, Moments>> {
        self.cells.get(key)
    }

    pub fn scenarios(&self) -> BTreeSet<String> {
        self.cells
            .values()
            .flat_map(|row| row.keys().map(|id| id.scenario.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SegmentKey {
        SegmentKey::from_group("Afar", "Goat", "Pastoral", "Adult Female", 2021)
    }

    #[test]
    fn missing_is_not_zero() {
        let store = ScenarioStore::from_records([ScenarioRecord {
            key: key(),
            scenario: "current".into(),
            item: "Gross Margin".into(),
            estimate: Estimate::new(1000.0, 10.0),
        }]);
        assert_eq!(
            store.get(&key(), "CURRENT", "gross  margin"),
            Some(Estimate::new(1000.0, 10.0))
        );
        assert_eq!(store.get(&key(), "ideal", "Gross Margin"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn canonical_scenarios() {
        assert_eq!(scenario::canonical(" All_Mortality_Zero "), "mortality_zero");
        assert_eq!(scenario::canonical("all_mortality_zero_AF"), "mortality_zero_af");
        assert_eq!(scenario::canonical("ideal_AF"), "ideal_af");
    }

    #[test]
    fn classifies_items() {
        assert_eq!(ItemType::classify("Gross Margin"), Some(ItemType::MonetaryValue));
        assert_eq!(ItemType::classify("Health Cost"), Some(ItemType::MonetaryCost));
        assert_eq!(
            ItemType::classify("Population Liveweight (kg)"),
            Some(ItemType::PhysicalQuantity)
        );
        assert_eq!(ItemType::classify("Something Else"), None);
    }
}
