use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub min: f64,
    pub max: Option<f64>,
    pub rate: f64,
    pub base_amount: f64,
}

impl TaxBracket {
    fn contains(&self, income: f64) -> bool {
        income >= self.min && self.max.is_none_or(|max| income <= max)
    }

    fn gross_tax(&self, income: f64) -> f64 {
        self.base_amount + (income - self.min + 1.0) * self.rate / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRebates {
    pub primary: f64,
    pub secondary: f64,
    pub tertiary: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxThresholds {
    pub below65: f64,
    pub age65_to74: f64,
    pub age75_plus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CgtConfig {
    pub inclusion_rate: f64,
    pub annual_exclusion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestExemption {
    pub below65: f64,
    pub age65_plus: f64,
}

/// Income tax table. Brackets must be sorted ascending and contiguous with an
/// open-ended last bracket; that is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxConfig {
    pub income_tax_brackets: Vec<TaxBracket>,
    pub tax_rebates: TaxRebates,
    pub tax_thresholds: TaxThresholds,
    pub cgt: CgtConfig,
    pub dividend_withholding_tax: f64,
    pub interest_exemption: InterestExemption,
}

impl TaxConfig {
    /// South African individual tax table for the 2024/25 year of assessment.
    pub fn south_africa_2025() -> Self {
        let bracket = |min: f64, max: Option<f64>, rate: f64, base_amount: f64| TaxBracket {
            min,
            max,
            rate,
            base_amount,
        };
        Self {
            income_tax_brackets: vec![
                bracket(0.0, Some(237_100.0), 18.0, 0.0),
                bracket(237_101.0, Some(370_500.0), 26.0, 42_678.0),
                bracket(370_501.0, Some(512_800.0), 31.0, 77_362.0),
                bracket(512_801.0, Some(673_000.0), 36.0, 121_475.0),
                bracket(673_001.0, Some(857_900.0), 39.0, 179_147.0),
                bracket(857_901.0, Some(1_817_000.0), 41.0, 251_258.0),
                bracket(1_817_001.0, None, 45.0, 644_489.0),
            ],
            tax_rebates: TaxRebates {
                primary: 17_235.0,
                secondary: 9_444.0,
                tertiary: 3_145.0,
            },
            tax_thresholds: TaxThresholds {
                below65: 95_750.0,
                age65_to74: 148_217.0,
                age75_plus: 165_689.0,
            },
            cgt: CgtConfig {
                inclusion_rate: 40.0,
                annual_exclusion: 40_000.0,
            },
            dividend_withholding_tax: 20.0,
            interest_exemption: InterestExemption {
                below65: 23_800.0,
                age65_plus: 34_500.0,
            },
        }
    }
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self::south_africa_2025()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTaxResult {
    pub gross_tax: f64,
    pub rebate: f64,
    pub net_tax: f64,
    pub effective_rate: f64,
    pub marginal_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CgtResult {
    pub gain: f64,
    pub taxable_gain: f64,
    pub inclusion_amount: f64,
    pub marginal_rate: f64,
    pub cgt_payable: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestTaxResult {
    pub gross: f64,
    pub exempt: f64,
    pub taxable: f64,
    pub tax: f64,
    pub net: f64,
}

pub fn tax_threshold(age: u32, config: &TaxConfig) -> f64 {
    let thresholds = &config.tax_thresholds;
    if age >= 75 {
        thresholds.age75_plus
    } else if age >= 65 {
        thresholds.age65_to74
    } else {
        thresholds.below65
    }
}

pub fn total_rebate(age: u32, config: &TaxConfig) -> f64 {
    let rebates = &config.tax_rebates;
    let mut rebate = rebates.primary;
    if age >= 65 {
        rebate += rebates.secondary;
    }
    if age >= 75 {
        rebate += rebates.tertiary;
    }
    rebate
}

/// Gross tax before rebates. Incomes that fall between two integer bracket
/// bounds use the lower bracket, capped at the next bracket's opening amount.
fn gross_tax_for(income: f64, config: &TaxConfig) -> Option<(f64, f64)> {
    let brackets = &config.income_tax_brackets;
    if let Some(bracket) = brackets.iter().find(|b| b.contains(income)) {
        return Some((bracket.gross_tax(income), bracket.rate));
    }

    let index = brackets.iter().rposition(|b| b.min <= income)?;
    let bracket = &brackets[index];
    let gross = bracket.gross_tax(income);
    match brackets.get(index + 1) {
        Some(next) => Some((gross.min(next.gross_tax(next.min)), bracket.rate)),
        None => Some((gross, bracket.rate)),
    }
}

/// Bracket rate (percent) applying at `income`, zero at or below the age threshold.
pub fn marginal_rate(income: f64, age: u32, config: &TaxConfig) -> f64 {
    if income <= tax_threshold(age, config) {
        return 0.0;
    }
    gross_tax_for(income, config)
        .map(|(_, rate)| rate)
        .unwrap_or(0.0)
}

pub fn calculate_income_tax(taxable_income: f64, age: u32, config: &TaxConfig) -> IncomeTaxResult {
    if !taxable_income.is_finite() || taxable_income <= tax_threshold(age, config) {
        return IncomeTaxResult::default();
    }

    let Some((gross_tax, rate)) = gross_tax_for(taxable_income, config) else {
        return IncomeTaxResult::default();
    };
    let rebate = total_rebate(age, config);
    let net_tax = (gross_tax - rebate).max(0.0);

    IncomeTaxResult {
        gross_tax,
        rebate,
        net_tax,
        effective_rate: net_tax / taxable_income * 100.0,
        marginal_rate: rate,
    }
}

pub fn calculate_cgt(gain: f64, age: u32, config: &TaxConfig, other_income: f64) -> CgtResult {
    if gain <= 0.0 {
        return CgtResult::default();
    }

    let taxable_gain = (gain - config.cgt.annual_exclusion).max(0.0);
    let inclusion_amount = taxable_gain * config.cgt.inclusion_rate / 100.0;
    let rate = marginal_rate(other_income.max(0.0) + inclusion_amount, age, config);

    CgtResult {
        gain,
        taxable_gain,
        inclusion_amount,
        marginal_rate: rate,
        cgt_payable: inclusion_amount * rate / 100.0,
    }
}

/// Dividends withheld at source at the flat withholding rate.
pub fn calculate_dividend_tax(gross_dividends: f64, config: &TaxConfig) -> f64 {
    gross_dividends.max(0.0) * config.dividend_withholding_tax / 100.0
}

pub fn calculate_interest_tax(
    gross_interest: f64,
    age: u32,
    config: &TaxConfig,
    marginal_rate: f64,
) -> InterestTaxResult {
    let gross = gross_interest.max(0.0);
    let exemption = if age >= 65 {
        config.interest_exemption.age65_plus
    } else {
        config.interest_exemption.below65
    };
    let exempt = gross.min(exemption.max(0.0));
    let taxable = gross - exempt;
    let tax = taxable * marginal_rate.max(0.0) / 100.0;

    InterestTaxResult {
        gross,
        exempt,
        taxable,
        tax,
        net: gross - tax,
    }
}
