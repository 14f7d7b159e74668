//! Derived currency and per-kg-biomass views.
//!
//! Value columns are found by name: `mean`, `mean_*`, `stdev`, `stdev_*`.
//! Dividing by a fixed denominator `r` gives `mean/r` and `stdev/r`
//! (`Var(X/r) = Var(X)/r²`). A missing or non-positive denominator yields null.

use std::collections::{BTreeSet, HashMap};

use polars::prelude::*;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::AhleError;
use crate::exchange::ExchangeRates;
use crate::schema::{derived, segment as seg_cols};
use crate::segment::SegmentKey;
use crate::store::{item, scenario, ScenarioStore};

const RATE: &str = "__exchange_rate";

/// True for `mean`/`stdev` columns that are not themselves a currency view.
fn is_value_column(name: &str) -> bool {
    let stat = name == "mean"
        || name == "stdev"
        || name.starts_with("mean_")
        || name.starts_with("stdev_");
    stat && !name.ends_with(derived::USD)
}

fn is_per_kg(name: &str) -> bool {
    name.contains(derived::PER_KG_BIOMASS)
}

/// Base (local currency, per segment) value columns.
pub fn base_value_columns(df: &DataFrame) -> Vec<String> {
    df.get_column_names_str()
        .iter()
        .filter(|c| is_value_column(c) && !is_per_kg(c))
        .map(|c| c.to_string())
        .collect()
}

/// Add `<col>_perkgbiomass` for every base value column, dividing by the
/// segment's liveweight. `liveweight` carries the segment key columns plus
/// `population_liveweight_kg`.
pub fn per_kg_biomass(df: DataFrame, liveweight: &DataFrame) -> Result<DataFrame, AhleError> {
    let columns = base_value_columns(&df);
    if columns.is_empty() {
        return Ok(df);
    }

    let lookup: HashMap<SegmentKey, f64> = {
        let keys = segment_keys(liveweight)?;
        let values = liveweight.column(derived::LIVEWEIGHT)?.f64()?;
        keys.into_iter()
            .enumerate()
            .filter_map(|(i, k)| Some((k?, values.get(i)?)))
            .collect()
    };
    let denominators: Vec<Option<f64>> = segment_keys(&df)?
        .iter()
        .map(|k| k.as_ref().and_then(|k| lookup.get(k).copied()))
        .collect();

    let lw = col(derived::LIVEWEIGHT);
    let exprs: Vec<Expr> = columns
        .iter()
        .map(|c| {
            when(lw.clone().gt(lit(0.0)))
                .then(col(c.as_str()) / lw.clone())
                .otherwise(lit(NULL).cast(DataType::Float64))
                .alias(format!("{c}{}", derived::PER_KG_BIOMASS))
        })
        .collect();

    let mut df = df;
    df.with_column(Column::new(derived::LIVEWEIGHT.into(), &denominators))?;
    let out = df.lazy().with_columns(exprs).collect()?;
    Ok(out.drop(derived::LIVEWEIGHT)?)
}

/// Add `<col>_usd` for every value column (base and per-kg), using the rate
/// of the row's year. With `mask`, only rows where that boolean column is
/// true are converted.
pub fn to_usd(
    df: DataFrame,
    rates: &ExchangeRates,
    country: &str,
    mask: Option<&str>,
    diags: &mut Diagnostics,
) -> Result<DataFrame, AhleError> {
    let columns: Vec<String> = df
        .get_column_names_str()
        .iter()
        .filter(|c| is_value_column(c))
        .map(|c| c.to_string())
        .collect();
    if columns.is_empty() {
        return Ok(df);
    }

    let mut missing: BTreeSet<i32> = BTreeSet::new();
    let rate_vec: Vec<Option<f64>> = df
        .column(seg_cols::YEAR)?
        .i32()?
        .into_iter()
        .map(|y| {
            let y = y?;
            let r = rates.rate(country, y);
            if r.is_none() {
                missing.insert(y);
            }
            r
        })
        .collect();
    for y in missing {
        diags.push_once(
            DiagnosticKind::MissingRate,
            format!("{country} {y}"),
            "no exchange rate on or before this year, currency columns left null",
        );
    }

    let exprs: Vec<Expr> = columns
        .iter()
        .map(|c| {
            let converted = col(c.as_str()) / col(RATE);
            let value = match mask {
                Some(m) => when(col(m))
                    .then(converted)
                    .otherwise(lit(NULL).cast(DataType::Float64)),
                None => converted,
            };
            value.alias(format!("{c}{}", derived::USD))
        })
        .collect();

    let mut df = df;
    df.with_column(Column::new(RATE.into(), &rate_vec))?;
    let out = df.lazy().with_columns(exprs).collect()?;
    Ok(out.drop(RATE)?)
}

/// Segment key of every row; `None` where a key column is null.
fn segment_keys(df: &DataFrame) -> Result<Vec<Option<SegmentKey>>, AhleError> {
    let region = df.column(seg_cols::REGION)?.str()?;
    let species = df.column(seg_cols::SPECIES)?.str()?;
    let prodsys = df.column(seg_cols::PRODUCTION_SYSTEM)?.str()?;
    let age = df.column(seg_cols::AGE_GROUP)?.str()?;
    let sex = df.column(seg_cols::SEX)?.str()?;
    let year = df.column(seg_cols::YEAR)?.i32()?;

    Ok((0..df.height())
        .map(|i| {
            Some(SegmentKey::new(
                region.get(i)?,
                species.get(i)?,
                prodsys.get(i)?,
                age.get(i)?,
                sex.get(i)?,
                year.get(i)?,
            ))
        })
        .collect())
}

/// Add `lower95*` / `upper95*` for every `mean*` column with a matching `stdev*`.
pub fn add_bounds(df: DataFrame, z: f64) -> Result<DataFrame, AhleError> {
    let names: Vec<String> = df.get_column_names_str().iter().map(|c| c.to_string()).collect();
    let mut exprs = Vec::new();
    for name in &names {
        let Some(rest) = name.strip_prefix("mean") else {
            continue;
        };
        if !(rest.is_empty() || rest.starts_with('_')) {
            continue;
        }
        let stdev = format!("stdev{rest}");
        if !names.contains(&stdev) {
            continue;
        }
        exprs.push(
            (col(name.as_str()) - lit(z) * col(stdev.as_str())).alias(format!("{}{rest}", derived::LOWER95)),
        );
        exprs.push(
            (col(name.as_str()) + lit(z) * col(stdev.as_str())).alias(format!("{}{rest}", derived::UPPER95)),
        );
    }
    if exprs.is_empty() {
        return Ok(df);
    }
    Ok(df.lazy().with_columns(exprs).collect()?)
}

/// Current-scenario liveweight per segment, for [`per_kg_biomass`].
/// Segments whose liveweight is not positive are reported; their per-kg
/// values come out null.
pub fn liveweight_frame(store: &ScenarioStore, diags: &mut Diagnostics) -> Result<DataFrame, AhleError> {
    let mut region = Vec::new();
    let mut species = Vec::new();
    let mut prodsys = Vec::new();
    let mut age = Vec::new();
    let mut sex = Vec::new();
    let mut year = Vec::new();
    let mut lw = Vec::new();

    for key in store.segments() {
        let Some(m) = store.moments(key, scenario::CURRENT, item::POPULATION_LIVEWEIGHT) else {
            continue;
        };
        if m.mean <= 0.0 {
            diags.push(
                DiagnosticKind::ZeroDenominator,
                key.to_string(),
                format!("population liveweight is {}, no per-kg values", m.mean),
            );
        }
        region.push(key.region.clone());
        species.push(key.species.clone());
        prodsys.push(key.production_system.clone());
        age.push(key.age_group.clone());
        sex.push(key.sex.clone());
        year.push(key.year);
        lw.push(m.mean);
    }

    Ok(DataFrame::new(vec![
        Column::new(seg_cols::REGION.into(), &region),
        Column::new(seg_cols::SPECIES.into(), &species),
        Column::new(seg_cols::PRODUCTION_SYSTEM.into(), &prodsys),
        Column::new(seg_cols::AGE_GROUP.into(), &age),
        Column::new(seg_cols::SEX.into(), &sex),
        Column::new(seg_cols::YEAR.into(), &year),
        Column::new(derived::LIVEWEIGHT.into(), &lw),
    ])?)
}

/// Settings for [`normalize`].
pub struct NormalizeOptions<'a> {
    pub liveweight: Option<&'a DataFrame>,
    pub rates: Option<(&'a ExchangeRates, &'a str)>,
    /// Boolean column restricting currency conversion.
    pub currency_mask: Option<&'a str>,
    pub z: f64,
}

/// Per-kg view, then currency view, then 95% bounds for everything.
pub fn normalize(
    df: DataFrame,
    opts: &NormalizeOptions<'_>,
    diags: &mut Diagnostics,
) -> Result<DataFrame, AhleError> {
    let mut df = df;
    if let Some(lw) = opts.liveweight {
        df = per_kg_biomass(df, lw)?;
    }
    if let Some((rates, country)) = opts.rates {
        df = to_usd(df, rates, country, opts.currency_mask, diags)?;
    }
    add_bounds(df, opts.z)
}
