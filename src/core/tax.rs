//! Tax bracket engine - Progressive PAYE on monthly gross pay.
//!
//! Monthly gross is annualised, the tax-free threshold is removed, and the remaining
//! taxable income is taxed band by band. Every band is taxed at its own rate no matter
//! how far income climbs past it, so the tax function is continuous at band edges.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};

use super::round_money;

/// One progressive band. A band without a width absorbs all remaining income.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBand {
    /// Size of the band in annual taxable income
    #[serde(default)]
    pub width: Option<f64>,
    /// Rate applied inside the band, as a fraction
    pub rate: f64,
}

/// Tax owed within one band of a computation
#[derive(Debug, Clone, PartialEq)]
pub struct BandTax {
    /// Rate of the band
    pub rate: f64,
    /// Annual income taxed in this band
    pub taxable: f64,
    /// Annual tax from this band
    pub tax: f64,
}

/// A complete PAYE table: threshold plus ordered bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxTable {
    /// Annual income exempt from tax
    pub tax_free_threshold: f64,
    /// Bands in ascending order; only the last may be open-ended
    pub bands: Vec<TaxBand>,
}

impl Default for TaxTable {
    fn default() -> Self {
        Self::statutory()
    }
}

impl TaxTable {
    /// The statutory table: ₦300,000 threshold, then 7/11/15/19/21%.
    #[must_use]
    pub fn statutory() -> Self {
        let band = |width: f64, rate: f64| TaxBand {
            width: Some(width),
            rate,
        };
        Self {
            tax_free_threshold: 300_000.0,
            bands: vec![
                band(300_000.0, 0.07),
                band(500_000.0, 0.11),
                band(500_000.0, 0.15),
                band(1_600_000.0, 0.19),
                TaxBand {
                    width: None,
                    rate: 0.21,
                },
            ],
        }
    }

    /// Checks the table describes a monotone tax function.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for negative values or an open band that is not last.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Error::Config {
            message: format!("Invalid tax table: {message}"),
        };
        if self.tax_free_threshold < 0.0 || !self.tax_free_threshold.is_finite() {
            return Err(invalid("tax_free_threshold must be a non-negative number"));
        }
        if self.bands.is_empty() {
            return Err(invalid("at least one band is required"));
        }
        let last = self.bands.len() - 1;
        for (i, band) in self.bands.iter().enumerate() {
            if !(0.0..=1.0).contains(&band.rate) {
                return Err(invalid("rates must be fractions between 0 and 1"));
            }
            match band.width {
                Some(width) if width <= 0.0 || !width.is_finite() => {
                    return Err(invalid("band widths must be positive"));
                }
                None if i != last => return Err(invalid("only the last band may be open-ended")),
                _ => {}
            }
        }
        Ok(())
    }

    /// Splits annual gross income across the bands.
    #[must_use]
    pub fn annual_breakdown(&self, annual_gross: f64) -> Vec<BandTax> {
        let mut remaining = (annual_gross - self.tax_free_threshold).max(0.0);
        let mut breakdown = Vec::new();
        for band in &self.bands {
            if remaining <= 0.0 {
                break;
            }
            let taxable = band.width.map_or(remaining, |width| remaining.min(width));
            breakdown.push(BandTax {
                rate: band.rate,
                taxable,
                tax: taxable * band.rate,
            });
            remaining -= taxable;
        }
        breakdown
    }

    /// Annual tax on annual gross income, unrounded.
    #[must_use]
    pub fn annual_tax(&self, annual_gross: f64) -> f64 {
        self.annual_breakdown(annual_gross)
            .iter()
            .map(|band| band.tax)
            .sum()
    }
}

/// Monthly PAYE for a monthly gross under the statutory table.
#[must_use]
pub fn calculate_paye(gross_monthly_pay: f64) -> f64 {
    calculate_paye_with(&TaxTable::statutory(), gross_monthly_pay)
}

/// Monthly PAYE for a monthly gross under `table`, rounded to kobo.
#[must_use]
pub fn calculate_paye_with(table: &TaxTable, gross_monthly_pay: f64) -> f64 {
    if !gross_monthly_pay.is_finite() || gross_monthly_pay <= 0.0 {
        return 0.0;
    }
    round_money(table.annual_tax(gross_monthly_pay * 12.0) / 12.0)
}
