/// Column-name constants for the AHLE tables.
/// Shared by the pipeline, the CLI output and the Python bindings.

// ── Simulator output columns ────────────────────────────────────────────────
pub mod simulator {
    pub const ITEM: &str = "item";
    pub const GROUP: &str = "group";
    pub const MEAN: &str = "mean";
    pub const STDEV: &str = "stdev";
    /// Prefixes of the statistic columns in a pre-combined wide table.
    pub const MEAN_PREFIX: &str = "mean_";
    pub const STDEV_PREFIX: &str = "stdev_";
}

// ── Segment key columns ─────────────────────────────────────────────────────
pub mod segment {
    pub const REGION: &str = "region";
    pub const SPECIES: &str = "species";
    pub const PRODUCTION_SYSTEM: &str = "production_system";
    pub const AGE_GROUP: &str = "age_group";
    pub const SEX: &str = "sex";
    pub const YEAR: &str = "year";
    pub const GROUP: &str = "group";
}

// ── Loss envelope columns ───────────────────────────────────────────────────
pub mod loss {
    pub const AGE_CLASS: &str = "age_class";
    pub const COMPONENT: &str = "component";
    pub const CAUSE: &str = "cause";
    pub const DISEASE: &str = "disease";
    pub const MEAN: &str = "mean";
    pub const STDEV: &str = "stdev";
    pub const ATTRIBUTION_STATE: &str = "attribution_state";
    pub const FLAGGED: &str = "flagged";
}

// ── Scenario summary columns ────────────────────────────────────────────────
pub mod summary {
    pub const ITEM: &str = "item";
    pub const ITEM_TYPE: &str = "item_type";
    pub const IS_CURRENCY: &str = "is_currency";
    pub const MEAN_DIFF_IDEAL: &str = "mean_diff_ideal";
    pub const STDEV_DIFF_IDEAL: &str = "stdev_diff_ideal";
}

// ── Cause proportion columns ────────────────────────────────────────────────
pub mod attribution {
    pub const SPECIES: &str = "species";
    pub const PRODUCTION_SYSTEM: &str = "production_system";
    pub const AGE_CLASS: &str = "age_class";
    pub const COMPONENT: &str = "component";
    /// Component column name used by the attribution program's output.
    pub const AHLE: &str = "ahle";
    pub const CAUSE: &str = "cause";
    pub const PROPORTION: &str = "proportion";
    /// Per-cause means, normalised to proportions when no proportion column exists.
    pub const MEAN: &str = "mean";
}

// ── Attribution program input headers ───────────────────────────────────────
pub mod attribution_input {
    pub const SPECIES: &str = "Species";
    pub const PRODUCTION_SYSTEM: &str = "Production system";
    pub const AGE_CLASS: &str = "Age class";
    pub const AHLE: &str = "AHLE";
    pub const MEAN: &str = "mean";
    pub const SD: &str = "sd";
    pub const REGION: &str = "region";
    pub const YEAR: &str = "year";
}

// ── Exchange rate columns ───────────────────────────────────────────────────
pub mod exchange {
    pub const COUNTRY: &str = "country";
    pub const YEAR: &str = "year";
    pub const RATE: &str = "rate";
}

// ── Derived column suffixes ─────────────────────────────────────────────────
pub mod derived {
    pub const USD: &str = "_usd";
    pub const PER_KG_BIOMASS: &str = "_perkgbiomass";
    pub const LOWER95: &str = "lower95";
    pub const UPPER95: &str = "upper95";
    /// Liveweight denominator joined in for the per-kg view.
    pub const LIVEWEIGHT: &str = "population_liveweight_kg";
}

// ── Diagnostics columns ─────────────────────────────────────────────────────
pub mod diagnostics {
    pub const SEVERITY: &str = "severity";
    pub const KIND: &str = "kind";
    pub const CONTEXT: &str = "context";
    pub const MESSAGE: &str = "message";
}
