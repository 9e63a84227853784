use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::currency::ExchangeRates;
use super::fees::FeeSettings;
use super::tax::TaxConfig;

pub const CURRENT_SCHEMA_VERSION: u64 = 2;

fn current_schema_version() -> u64 {
    CURRENT_SCHEMA_VERSION
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    #[serde(rename = "Local Equity")]
    LocalEquity,
    #[serde(rename = "Offshore Equity")]
    OffshoreEquity,
    #[serde(rename = "Local Bonds")]
    LocalBonds,
    #[serde(rename = "Offshore Bonds")]
    OffshoreBonds,
    #[serde(rename = "Property")]
    Property,
    #[serde(rename = "Commodities")]
    Commodities,
    #[serde(rename = "Cash")]
    Cash,
}

impl AssetClass {
    pub const ALL: [AssetClass; 7] = [
        AssetClass::LocalEquity,
        AssetClass::OffshoreEquity,
        AssetClass::LocalBonds,
        AssetClass::OffshoreBonds,
        AssetClass::Property,
        AssetClass::Commodities,
        AssetClass::Cash,
    ];

    /// Long-run nominal return assumption in percent.
    pub fn default_expected_return(self) -> f64 {
        match self {
            AssetClass::LocalEquity => 11.0,
            AssetClass::OffshoreEquity => 10.0,
            AssetClass::LocalBonds => 9.0,
            AssetClass::OffshoreBonds => 5.0,
            AssetClass::Property => 9.0,
            AssetClass::Commodities => 6.0,
            AssetClass::Cash => 7.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AssetType {
    Investible,
    #[serde(rename = "Non-Investible")]
    NonInvestible,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "TFSA")]
    Tfsa,
    Taxable,
    #[serde(rename = "RA")]
    Ra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default)]
    pub name: String,
    pub asset_class: AssetClass,
    pub currency: String,
    pub asset_type: AssetType,
    pub account_type: AccountType,
    pub units: f64,
    pub current_price: f64,
    #[serde(default)]
    pub cost_price: f64,
    #[serde(default)]
    pub dividend_yield: f64,
    #[serde(default)]
    pub interest_yield: f64,
    #[serde(default)]
    pub ter: f64,
}

impl Asset {
    /// Market value in the asset's own currency.
    pub fn value(&self) -> f64 {
        self.units.max(0.0) * self.current_price.max(0.0)
    }

    pub fn cost(&self) -> f64 {
        self.units.max(0.0) * self.cost_price.max(0.0)
    }

    pub fn is_investible(&self) -> bool {
        self.asset_type == AssetType::Investible
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum IncomeType {
    Work,
    Investment,
    Pension,
    Rental,
    Annuity,
    Other,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AnnuityType {
    Life,
    Living,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSource {
    #[serde(default)]
    pub name: String,
    pub monthly_amount: f64,
    pub currency: String,
    #[serde(default)]
    pub start_age: Option<u32>,
    #[serde(default)]
    pub end_age: Option<u32>,
    #[serde(default)]
    pub is_taxable: bool,
    #[serde(default)]
    pub is_inflation_adjusted: bool,
    #[serde(rename = "type")]
    pub kind: IncomeType,
    #[serde(default)]
    pub annuity_type: Option<AnnuityType>,
    #[serde(default)]
    pub capital_value: Option<f64>,
    /// Annual escalation in percent; annuities only.
    #[serde(default)]
    pub escalation_rate: Option<f64>,
}

impl IncomeSource {
    pub fn is_active_at(&self, age: u32) -> bool {
        self.start_age.is_none_or(|start| start <= age) && self.end_age.is_none_or(|end| age <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseItem {
    pub name: String,
    pub monthly_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseCategory {
    pub name: String,
    #[serde(default)]
    pub monthly_amount: f64,
    #[serde(default)]
    pub subcategories: Vec<ExpenseItem>,
}

impl ExpenseCategory {
    pub fn monthly_total(&self) -> f64 {
        if self.subcategories.is_empty() {
            self.monthly_amount.max(0.0)
        } else {
            self.subcategories
                .iter()
                .map(|item| item.monthly_amount.max(0.0))
                .sum()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExpenseSource {
    /// Sum of the profile's expense categories.
    #[default]
    Modules,
    #[serde(rename_all = "camelCase")]
    Flat { annual_expenses: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseBand {
    pub start_age: u32,
    pub end_age: u32,
    pub percentage: f64,
}

impl PhaseBand {
    pub fn contains(&self, age: u32) -> bool {
        self.start_age <= age && age <= self.end_age
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpensePhases {
    pub working: Option<PhaseBand>,
    pub active_retirement: Option<PhaseBand>,
    pub slower_pace: Option<PhaseBand>,
    pub later_years: Option<PhaseBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeExpensePhase {
    pub name: String,
    pub start_age: u32,
    pub end_age: u32,
    #[serde(default)]
    pub categories: Vec<ExpenseItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgeBasedExpensePlan {
    pub enabled: bool,
    pub phases: Vec<AgeExpensePhase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetClassDrop {
    pub asset_class: AssetClass,
    pub drop_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCrash {
    pub age: u32,
    #[serde(default)]
    pub description: String,
    pub drops: Vec<AssetClassDrop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnexpectedExpense {
    pub age: u32,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyMovement {
    pub currency: String,
    /// Annual change of the currency against the reporting currency, in percent.
    pub annual_change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default = "current_schema_version")]
    pub schema_version: u64,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub inflation_rate: f64,
    pub retirement_age: u32,
    pub life_expectancy: u32,
    #[serde(default)]
    pub monthly_savings: f64,
    #[serde(default)]
    pub expenses: ExpenseSource,
    #[serde(default)]
    pub expected_returns: Option<BTreeMap<AssetClass, f64>>,
    #[serde(default)]
    pub currency_movements: Vec<CurrencyMovement>,
    #[serde(default)]
    pub expense_phases: Option<ExpensePhases>,
    #[serde(default)]
    pub age_based_plan: Option<AgeBasedExpensePlan>,
    #[serde(default)]
    pub market_crashes: Vec<MarketCrash>,
    #[serde(default)]
    pub unexpected_expenses: Vec<UnexpectedExpense>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ScenarioResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

impl Scenario {
    pub fn record_run(&mut self, result: ScenarioResult, ran_at: DateTime<Utc>) {
        self.results = Some(result);
        self.last_run = Some(ran_at);
    }
}

fn default_reporting_currency() -> String {
    "ZAR".to_string()
}

fn default_retirement_age() -> u32 {
    65
}

fn default_life_expectancy() -> u32 {
    90
}

fn default_inflation_rate() -> f64 {
    5.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSettings {
    pub current_age: u32,
    #[serde(default = "default_reporting_currency")]
    pub reporting_currency: String,
    #[serde(default)]
    pub exchange_rates: Option<ExchangeRates>,
    #[serde(default)]
    pub tax_config: TaxConfig,
    #[serde(default)]
    pub fees: FeeSettings,
    #[serde(default = "default_retirement_age")]
    pub retirement_age: u32,
    #[serde(default = "default_life_expectancy")]
    pub life_expectancy: u32,
    #[serde(default = "default_inflation_rate")]
    pub inflation_rate: f64,
    #[serde(default)]
    pub monthly_savings: f64,
    #[serde(default)]
    pub expense_phases: Option<ExpensePhases>,
}

impl ProfileSettings {
    pub fn exchange_rates(&self) -> ExchangeRates {
        self.exchange_rates
            .clone()
            .unwrap_or_else(|| ExchangeRates::new(self.reporting_currency.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default = "current_schema_version")]
    pub schema_version: u64,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub income_sources: Vec<IncomeSource>,
    #[serde(default)]
    pub expense_categories: Vec<ExpenseCategory>,
    #[serde(default)]
    pub settings: Option<ProfileSettings>,
}

impl Profile {
    pub fn monthly_expenses(&self) -> f64 {
        self.expense_categories
            .iter()
            .map(ExpenseCategory::monthly_total)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTypeWeights {
    pub tfsa: f64,
    pub taxable: f64,
    pub ra: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryPoint {
    pub age: u32,
    pub start_value: f64,
    pub net_worth: f64,
    pub expenses: f64,
    pub income: f64,
    pub net_income: f64,
    pub income_tax: f64,
    pub withdrawal: f64,
    pub net_withdrawal: f64,
    pub withdrawal_tax: f64,
    pub drawdown_rate: f64,
    pub is_retired: bool,
    pub savings: f64,
    pub growth: f64,
    pub fees: f64,
    pub crash_loss: f64,
    pub unexpected_expense: f64,
    pub gain_ratio: f64,
    pub covered_by_income: f64,
    pub covered_by_returns: f64,
    pub covered_by_capital: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageShare {
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseCoverageBreakdown {
    pub by_income: CoverageShare,
    pub by_returns: CoverageShare,
    pub by_capital_drawdown: CoverageShare,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMetrics {
    pub initial_portfolio_value: f64,
    pub weighted_expected_return: f64,
    pub initial_gain_ratio: f64,
    pub account_weights: AccountTypeWeights,
    pub asset_allocation: BTreeMap<AssetClass, f64>,
    pub weighted_ter: f64,
    pub initial_annual_asset_income: f64,
    pub average_drawdown_rate: f64,
    pub peak_drawdown_rate: f64,
    pub unfunded_expenses: f64,
    pub years_simulated: u32,
    pub years_with_errors: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub trajectory: Vec<TrajectoryPoint>,
    pub success: bool,
    pub depletion_age: Option<u32>,
    pub final_value: f64,
    pub shortfall: Option<f64>,
    pub total_withdrawn: f64,
    pub total_income: f64,
    pub total_expenses: f64,
    pub total_fees: f64,
    pub total_withdrawal_tax: f64,
    pub total_income_tax: f64,
    pub expense_coverage_breakdown: ExpenseCoverageBreakdown,
    pub metrics: ScenarioMetrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
