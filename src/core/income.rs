use serde::Serialize;

use super::currency::{ExchangeRates, to_reporting_currency};
use super::error::CurrencyError;
use super::types::{Asset, IncomeSource, IncomeType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeAtAge {
    pub total_income: f64,
    pub taxable_income: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestIncome {
    pub gross: f64,
    pub tax: f64,
    pub net: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIncome {
    pub dividends: f64,
    pub interest: InterestIncome,
}

impl AssetIncome {
    pub fn net_total(&self) -> f64 {
        self.dividends + self.interest.net
    }
}

fn escalation_percent(source: &IncomeSource, inflation_rate: f64) -> f64 {
    if source.kind == IncomeType::Annuity {
        source.escalation_rate.unwrap_or(0.0)
    } else if source.is_inflation_adjusted {
        inflation_rate
    } else {
        0.0
    }
}

/// Annual income at `age` in the reporting currency. `inflation_rate` is in percent.
pub fn calculate_income_at_age(
    age: u32,
    sources: &[IncomeSource],
    reporting_currency: &str,
    rates: &ExchangeRates,
    inflation_rate: f64,
    years_from_now: u32,
) -> Result<IncomeAtAge, CurrencyError> {
    let mut income = IncomeAtAge::default();
    let years = years_from_now as i32;

    for source in sources.iter().filter(|s| s.is_active_at(age)) {
        let monthly = to_reporting_currency(
            source.monthly_amount.max(0.0),
            &source.currency,
            reporting_currency,
            rates,
        )?;
        let growth = (1.0 + escalation_percent(source, inflation_rate) / 100.0).powi(years);
        let annual = monthly * growth * 12.0;

        income.total_income += annual;
        if source.is_taxable {
            income.taxable_income += annual;
        }
    }

    Ok(income)
}

/// Dividend yields are quoted net of withholding tax.
pub fn dividend_income(value: f64, dividend_yield: f64) -> f64 {
    value.max(0.0) * dividend_yield.max(0.0) / 100.0
}

pub fn interest_income(value: f64, interest_yield: f64, marginal_rate: f64) -> InterestIncome {
    let gross = value.max(0.0) * interest_yield.max(0.0) / 100.0;
    let tax = gross * marginal_rate.max(0.0) / 100.0;
    InterestIncome {
        gross,
        tax,
        net: gross - tax,
    }
}

pub fn calculate_asset_income(
    assets: &[Asset],
    reporting_currency: &str,
    rates: &ExchangeRates,
    marginal_rate: f64,
) -> Result<AssetIncome, CurrencyError> {
    let mut income = AssetIncome::default();
    for asset in assets.iter().filter(|a| a.is_investible()) {
        let value = to_reporting_currency(asset.value(), &asset.currency, reporting_currency, rates)?;
        income.dividends += dividend_income(value, asset.dividend_yield);
        let interest = interest_income(value, asset.interest_yield, marginal_rate);
        income.interest.gross += interest.gross;
        income.interest.tax += interest.tax;
        income.interest.net += interest.net;
    }
    Ok(income)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AccountType, AssetClass, AssetType};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn source(kind: IncomeType, monthly: f64) -> IncomeSource {
        IncomeSource {
            name: String::new(),
            monthly_amount: monthly,
            currency: "ZAR".to_string(),
            start_age: None,
            end_age: None,
            is_taxable: true,
            is_inflation_adjusted: false,
            kind,
            annuity_type: None,
            capital_value: None,
            escalation_rate: None,
        }
    }

    fn rates() -> ExchangeRates {
        ExchangeRates::new("ZAR").with_rate("USD", 18.0)
    }

    fn asset(value: f64, dividend_yield: f64, interest_yield: f64) -> Asset {
        Asset {
            name: "fund".to_string(),
            asset_class: AssetClass::LocalBonds,
            currency: "ZAR".to_string(),
            asset_type: AssetType::Investible,
            account_type: AccountType::Taxable,
            units: 1.0,
            current_price: value,
            cost_price: value,
            dividend_yield,
            interest_yield,
            ter: 0.0,
        }
    }

    #[test]
    fn source_activity_bounds_are_inclusive_and_open_when_missing() {
        let mut s = source(IncomeType::Work, 1.0);
        s.start_age = Some(40);
        s.end_age = Some(60);
        assert!(!s.is_active_at(39));
        assert!(s.is_active_at(40));
        assert!(s.is_active_at(60));
        assert!(!s.is_active_at(61));

        s.end_age = None;
        assert!(s.is_active_at(100));
    }

    #[test]
    fn income_escalates_by_source_kind() {
        let fixed = source(IncomeType::Pension, 1_000.0);
        let mut indexed = source(IncomeType::Rental, 1_000.0);
        indexed.is_inflation_adjusted = true;
        indexed.is_taxable = false;
        let mut annuity = source(IncomeType::Annuity, 1_000.0);
        annuity.is_inflation_adjusted = true;
        annuity.escalation_rate = Some(3.0);

        let income = calculate_income_at_age(
            70,
            &[fixed, indexed, annuity],
            "ZAR",
            &rates(),
            6.0,
            2,
        )
        .expect("rates available");

        let expected_fixed = 12_000.0;
        let expected_indexed = 12_000.0 * 1.06 * 1.06;
        let expected_annuity = 12_000.0 * 1.03 * 1.03;
        assert_approx(
            income.total_income,
            expected_fixed + expected_indexed + expected_annuity,
        );
        assert_approx(income.taxable_income, expected_fixed + expected_annuity);
    }

    #[test]
    fn foreign_income_is_converted_and_inactive_sources_skipped() {
        let mut usd = source(IncomeType::Investment, 100.0);
        usd.currency = "USD".to_string();
        let mut later = source(IncomeType::Pension, 5_000.0);
        later.start_age = Some(65);

        let income =
            calculate_income_at_age(50, &[usd, later], "ZAR", &rates(), 5.0, 0).expect("rates");
        assert_approx(income.total_income, 100.0 * 18.0 * 12.0);
    }

    #[test]
    fn unknown_income_currency_is_an_error() {
        let mut eur = source(IncomeType::Other, 100.0);
        eur.currency = "EUR".to_string();
        assert!(calculate_income_at_age(50, &[eur], "ZAR", &rates(), 5.0, 0).is_err());
    }

    #[test]
    fn dividends_are_already_net_of_withholding() {
        let income = calculate_asset_income(&[asset(100_000.0, 4.0, 0.0)], "ZAR", &rates(), 45.0)
            .expect("rates");
        assert_approx(income.dividends, 4_000.0);
        assert_approx(income.interest.tax, 0.0);
        assert_approx(income.net_total(), 4_000.0);
    }

    #[test]
    fn interest_is_taxed_at_marginal_rate() {
        let income = calculate_asset_income(&[asset(100_000.0, 0.0, 8.0)], "ZAR", &rates(), 45.0)
            .expect("rates");
        assert_approx(income.interest.gross, 8_000.0);
        assert_approx(income.interest.tax, 3_600.0);
        assert_approx(income.interest.net, 4_400.0);
    }

    #[test]
    fn non_investible_assets_produce_no_income() {
        let mut house = asset(2_000_000.0, 0.0, 5.0);
        house.asset_type = AssetType::NonInvestible;
        let income = calculate_asset_income(&[house], "ZAR", &rates(), 45.0).expect("rates");
        assert_eq!(income, AssetIncome::default());
    }
}
