use std::collections::BTreeMap;
use std::path::Path;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::AhleError;
use crate::ingest::{parse_floats, read_csv_as_strings, require_columns};
use crate::schema::exchange as cols;

/// Local currency units per USD, by country and year.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRates {
    rates: BTreeMap<(String, i32), f64>,
}

impl ExchangeRates {
    /// Build from `(country, year, rate)` triples. Non-positive rates are
    /// rejected and reported.
    pub fn from_rows<I, S>(rows: I, diags: &mut Diagnostics) -> Self
    where
        I: IntoIterator<Item = (S, i32, f64)>,
        S: AsRef<str>,
    {
        let mut rates = BTreeMap::new();
        for (country, year, rate) in rows {
            let country = country.as_ref();
            if rate <= 0.0 || !rate.is_finite() {
                diags.push(
                    DiagnosticKind::DataQuality,
                    format!("exchange rate {country} {year}"),
                    format!("rate {rate} rejected, must be positive"),
                );
                continue;
            }
            rates.insert((normalize(country), year), rate);
        }
        Self { rates }
    }

    /// Load the exchange-rate CSV: `country, year, rate`.
    pub fn load(path: &Path, diags: &mut Diagnostics) -> Result<Self, AhleError> {
        let raw = read_csv_as_strings(path)?;
        require_columns(&raw, &[cols::COUNTRY, cols::YEAR, cols::RATE], path)?;
        let df = parse_floats(raw, &[cols::YEAR.to_string(), cols::RATE.to_string()])?;

        let country = df.column(cols::COUNTRY)?.str()?;
        let year = df.column(cols::YEAR)?.f64()?;
        let rate = df.column(cols::RATE)?.f64()?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            match (country.get(i), year.get(i), rate.get(i)) {
                (Some(c), Some(y), Some(r)) => rows.push((c.to_string(), y as i32, r)),
                _ => diags.push(
                    DiagnosticKind::DataQuality,
                    path.display().to_string(),
                    format!("row {i} incomplete, skipped"),
                ),
            }
        }
        let rates = Self::from_rows(rows, diags);
        log::info!("loaded {} exchange rates from {}", rates.len(), path.display());
        Ok(rates)
    }

    /// Rate for `year`, carrying forward the most recent earlier year.
    /// Never extrapolates backwards.
    pub fn rate(&self, country: &str, year: i32) -> Option<f64> {
        let country = normalize(country);
        let ((_, found_year), rate) = self
            .rates
            .range((country.clone(), i32::MIN)..=(country, year))
            .next_back()?;
        if *found_year != year {
            log::debug!("exchange rate for {year} carried forward from {found_year}");
        }
        Some(*rate)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

fn normalize(country: &str) -> String {
    country.trim().to_ascii_lowercase()
}
