use std::fmt;

/// Roll-up label used on every dimension.
pub const OVERALL: &str = "Overall";
/// Sex roll-up word as it appears in group labels ("Adult Combined").
pub const COMBINED: &str = "Combined";
/// Cattle-only, male-only age group.
pub const OXEN: &str = "Oxen";
pub const MALE: &str = "Male";
pub const FEMALE: &str = "Female";

pub const ALL_SMALL_RUMINANTS: &str = "All Small Ruminants";
pub const ALL_POULTRY: &str = "All Poultry";

/// A dimension of the segment hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    Sex,
    AgeGroup,
    ProductionSystem,
    Species,
    Region,
}

impl Dimension {
    pub fn name(self) -> &'static str {
        match self {
            Dimension::Sex => "sex",
            Dimension::AgeGroup => "age_group",
            Dimension::ProductionSystem => "production_system",
            Dimension::Species => "species",
            Dimension::Region => "region",
        }
    }
}

/// Identifies one demographic segment.
///
/// Ordering is lexicographic over the fields, which keeps every table built
/// from `BTreeMap<SegmentKey, _>` deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentKey {
    pub region: String,
    pub species: String,
    pub production_system: String,
    pub age_group: String,
    pub sex: String,
    pub year: i32,
}

impl SegmentKey {
    pub fn new(
        region: impl Into<String>,
        species: impl Into<String>,
        production_system: impl Into<String>,
        age_group: impl Into<String>,
        sex: impl Into<String>,
        year: i32,
    ) -> Self {
        Self {
            region: region.into(),
            species: species.into(),
            production_system: production_system.into(),
            age_group: age_group.into(),
            sex: sex.into(),
            year,
        }
    }

    /// Build a key from a simulator group label such as "Adult Female".
    pub fn from_group(
        region: impl Into<String>,
        species: impl Into<String>,
        production_system: impl Into<String>,
        group: &str,
        year: i32,
    ) -> Self {
        let (age_group, sex) = parse_group(group);
        Self::new(region, species, production_system, age_group, sex, year)
    }

    pub fn get(&self, dim: Dimension) -> &str {
        match dim {
            Dimension::Sex => &self.sex,
            Dimension::AgeGroup => &self.age_group,
            Dimension::ProductionSystem => &self.production_system,
            Dimension::Species => &self.species,
            Dimension::Region => &self.region,
        }
    }

    /// Copy of this key with one dimension replaced.
    pub fn with(&self, dim: Dimension, value: &str) -> Self {
        let mut key = self.clone();
        let slot = match dim {
            Dimension::Sex => &mut key.sex,
            Dimension::AgeGroup => &mut key.age_group,
            Dimension::ProductionSystem => &mut key.production_system,
            Dimension::Species => &mut key.species,
            Dimension::Region => &mut key.region,
        };
        *slot = value.to_string();
        key
    }

    /// True when the key carries a concrete value (not a roll-up) on `dim`.
    pub fn is_leaf_on(&self, dim: Dimension) -> bool {
        let value = self.get(dim);
        match dim {
            Dimension::Species => !is_overall(value) && !is_species_group(value),
            _ => !is_overall(value),
        }
    }

    /// Display label combining age group and sex.
    pub fn group_label(&self) -> String {
        format_group(&self.age_group, &self.sex)
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.region,
            self.species,
            self.production_system,
            self.group_label(),
            self.year
        )
    }
}

pub fn is_overall(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(OVERALL)
}

/// Split a simulator group label into (age_group, sex).
///
/// "Combined" or a missing sex word map to `Overall`; "Oxen" is always male.
pub fn parse_group(group: &str) -> (String, String) {
    let mut words = group.split_whitespace();
    let age = words.next().unwrap_or(OVERALL);
    let sex = words.next();

    if age.eq_ignore_ascii_case(OXEN) {
        return (OXEN.to_string(), MALE.to_string());
    }
    let age = if is_overall(age) { OVERALL } else { age };
    let sex = match sex {
        None => OVERALL,
        Some(s) if s.eq_ignore_ascii_case(COMBINED) || is_overall(s) => OVERALL,
        Some(s) => s,
    };
    (age.to_string(), sex.to_string())
}

pub fn format_group(age_group: &str, sex: &str) -> String {
    if age_group.eq_ignore_ascii_case(OXEN) {
        return OXEN.to_string();
    }
    match (is_overall(age_group), is_overall(sex)) {
        (true, true) => OVERALL.to_string(),
        (true, false) => format!("{OVERALL} {sex}"),
        (false, true) => format!("{age_group} {COMBINED}"),
        (false, false) => format!("{age_group} {sex}"),
    }
}

// ── Species groups ──────────────────────────────────────────────────────────

pub fn is_small_ruminant(species: &str) -> bool {
    let s = species.trim();
    s.eq_ignore_ascii_case("sheep")
        || s.eq_ignore_ascii_case("goat")
        || s.eq_ignore_ascii_case(ALL_SMALL_RUMINANTS)
}

pub fn is_poultry(species: &str) -> bool {
    species.to_ascii_lowercase().contains("poultry")
}

pub fn is_cattle(species: &str) -> bool {
    species.trim().eq_ignore_ascii_case("cattle")
}

pub fn is_species_group(species: &str) -> bool {
    let s = species.trim();
    s.eq_ignore_ascii_case(ALL_SMALL_RUMINANTS) || s.eq_ignore_ascii_case(ALL_POULTRY)
}

/// The species group a leaf species rolls up into, if any.
pub fn species_group(species: &str) -> Option<&'static str> {
    if is_species_group(species) {
        return None;
    }
    if is_small_ruminant(species) {
        Some(ALL_SMALL_RUMINANTS)
    } else if is_poultry(species) {
        Some(ALL_POULTRY)
    } else {
        None
    }
}
