use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::CurrencyError;

/// Exchange rates against a single base currency: `rates[X]` is the value of
/// one unit of `X` expressed in `base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRates {
    pub base: String,
    #[serde(default)]
    pub rates: BTreeMap<String, f64>,
}

impl ExchangeRates {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            rates: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(currency.into(), rate);
        self
    }

    pub fn rate(&self, currency: &str) -> Result<f64, CurrencyError> {
        if currency == self.base {
            return Ok(1.0);
        }
        let Some(&rate) = self.rates.get(currency) else {
            return Err(CurrencyError::MissingRate {
                currency: currency.to_string(),
                base: self.base.clone(),
            });
        };
        if !rate.is_finite() || rate <= 0.0 {
            return Err(CurrencyError::InvalidRate {
                currency: currency.to_string(),
                rate,
            });
        }
        Ok(rate)
    }

    /// Builds rates from a legacy map keyed `"CUR/BASE"`. Pairs quoted against
    /// another currency are ignored.
    pub fn from_legacy_pairs(base: &str, pairs: &BTreeMap<String, f64>) -> Self {
        let mut rates = Self::new(base);
        for (pair, &rate) in pairs {
            let Some((currency, quote)) = pair.split_once('/') else {
                continue;
            };
            if quote == base && currency != base {
                rates.rates.insert(currency.to_string(), rate);
            }
        }
        rates
    }

    pub fn to_legacy_pairs(&self) -> BTreeMap<String, f64> {
        self.rates
            .iter()
            .filter(|(currency, _)| currency.as_str() != self.base)
            .map(|(currency, &rate)| (format!("{currency}/{}", self.base), rate))
            .collect()
    }
}

pub fn to_reporting_currency(
    amount: f64,
    from: &str,
    to: &str,
    rates: &ExchangeRates,
) -> Result<f64, CurrencyError> {
    if from == to {
        return Ok(amount);
    }
    Ok(amount * rates.rate(from)? / rates.rate(to)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> ExchangeRates {
        ExchangeRates::new("ZAR")
            .with_rate("USD", 18.0)
            .with_rate("GBP", 23.0)
    }

    #[test]
    fn same_currency_is_identity_even_without_rates() {
        let empty = ExchangeRates::new("ZAR");
        assert_eq!(to_reporting_currency(123.0, "EUR", "EUR", &empty), Ok(123.0));
    }

    #[test]
    fn converts_into_base_and_across() {
        let r = rates();
        assert_eq!(to_reporting_currency(10.0, "USD", "ZAR", &r), Ok(180.0));
        assert_eq!(to_reporting_currency(180.0, "ZAR", "USD", &r), Ok(10.0));
        let gbp_in_usd = to_reporting_currency(18.0, "GBP", "USD", &r).expect("known rates");
        assert!((gbp_in_usd - 23.0).abs() < 1e-9);
    }

    #[test]
    fn missing_or_invalid_rate_is_an_error() {
        let r = rates().with_rate("JPY", 0.0);
        assert!(matches!(
            to_reporting_currency(1.0, "EUR", "ZAR", &r),
            Err(CurrencyError::MissingRate { .. })
        ));
        assert!(matches!(
            to_reporting_currency(1.0, "JPY", "ZAR", &r),
            Err(CurrencyError::InvalidRate { .. })
        ));
    }

    #[test]
    fn legacy_pairs_round_trip() {
        let mut legacy = BTreeMap::new();
        legacy.insert("USD/ZAR".to_string(), 18.0);
        legacy.insert("GBP/ZAR".to_string(), 23.0);
        legacy.insert("EUR/USD".to_string(), 1.1);
        legacy.insert("malformed".to_string(), 2.0);

        let r = ExchangeRates::from_legacy_pairs("ZAR", &legacy);
        assert_eq!(r.rates.len(), 2);
        assert_eq!(r.rate("USD"), Ok(18.0));

        let back = r.to_legacy_pairs();
        assert_eq!(back.get("GBP/ZAR"), Some(&23.0));
        assert!(!back.contains_key("EUR/USD"));
    }
}
