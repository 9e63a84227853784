mod currency;
mod engine;
mod error;
mod expenses;
mod fees;
mod income;
mod migrate;
mod readiness;
mod tax;
mod types;
mod withdrawal;

pub use currency::{ExchangeRates, to_reporting_currency};
pub use engine::{MAX_PROJECTION_YEARS, run_all_scenarios, run_scenario};
pub use error::{CurrencyError, MigrationError, SimulationError};
pub use expenses::{
    ExpensePhase, ExpenseResolver, ResolvedExpenses, age_based_annual_expenses,
    base_annual_expenses, expense_percentage,
};
pub use fees::{FeeSchedule, FeeSettings, YearFees, calculate_scenario_year_fees};
pub use income::{
    AssetIncome, IncomeAtAge, InterestIncome, calculate_asset_income, calculate_income_at_age,
    dividend_income, interest_income,
};
pub use migrate::{
    load_profile, load_scenario, load_scenarios, migrate_profile, migrate_scenario,
    profile_from_value, scenario_from_value,
};
pub use readiness::{PhaseReadiness, ReadinessSummary, calculate_retirement_readiness};
pub use tax::{
    CgtConfig, CgtResult, IncomeTaxResult, InterestExemption, InterestTaxResult, TaxBracket,
    TaxConfig, TaxRebates, TaxThresholds, calculate_cgt, calculate_dividend_tax,
    calculate_income_tax, calculate_interest_tax, marginal_rate, tax_threshold, total_rebate,
};
pub use types::{
    AccountType, AccountTypeWeights, AgeBasedExpensePlan, AgeExpensePhase, AnnuityType, Asset,
    AssetClass, AssetClassDrop, AssetType, CURRENT_SCHEMA_VERSION, CoverageShare,
    CurrencyMovement, ExpenseCategory, ExpenseCoverageBreakdown, ExpenseItem, ExpensePhases,
    ExpenseSource, IncomeSource, IncomeType, MarketCrash, PhaseBand, Profile, ProfileSettings,
    Scenario, ScenarioMetrics, ScenarioResult, TrajectoryPoint, UnexpectedExpense,
};
pub use withdrawal::{
    MAX_GAIN_RATIO, MAX_WITHDRAWAL_TAX_RATIO, WithdrawalAllocation, account_type_weights,
    allocate_withdrawal, estimate_gain_ratio_for_projection, initial_gain_ratio,
};
