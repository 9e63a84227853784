use serde::Serialize;
use tracing::debug;

use super::engine::build_baseline;
use super::error::SimulationError;
use super::expenses::{ExpensePhase, ExpenseResolver, base_annual_expenses};
use super::income::calculate_income_at_age;
use super::tax::{calculate_income_tax, marginal_rate};
use super::types::{
    CURRENT_SCHEMA_VERSION, ExpensePhases, ExpenseSource, Profile, ProfileSettings, Scenario,
};
use super::withdrawal::allocate_withdrawal;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReadiness {
    /// `None` for retired years no band covers; those are priced at 100%.
    pub phase: Option<ExpensePhase>,
    pub start_age: u32,
    pub end_age: u32,
    /// First-year figures for the phase, in nominal terms.
    pub annual_expenses: f64,
    pub annual_net_income: f64,
    pub annual_gap: f64,
    pub annual_gross_withdrawal: f64,
    /// Present value at retirement of every gross withdrawal in the phase.
    pub capital_required: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSummary {
    pub current_portfolio_value: f64,
    pub projected_value_at_retirement: f64,
    pub weighted_expected_return: f64,
    pub initial_gain_ratio: f64,
    pub capital_required: f64,
    pub is_sufficient: bool,
    pub readiness_percent: f64,
    pub surplus: f64,
    pub shortfall: f64,
    pub annual_asset_income: f64,
    pub phases: Vec<PhaseReadiness>,
}

/// Settings-driven stand-in for a scenario: module expenses, default returns.
fn settings_scenario(settings: &ProfileSettings) -> Scenario {
    Scenario {
        schema_version: CURRENT_SCHEMA_VERSION,
        id: "readiness".to_string(),
        name: "readiness".to_string(),
        inflation_rate: settings.inflation_rate,
        retirement_age: settings.retirement_age,
        life_expectancy: settings.life_expectancy,
        monthly_savings: settings.monthly_savings,
        expenses: ExpenseSource::Modules,
        expected_returns: None,
        currency_movements: Vec::new(),
        expense_phases: Some(settings.expense_phases.clone().unwrap_or_else(|| {
            ExpensePhases::standard(settings.retirement_age, settings.life_expectancy)
        })),
        age_based_plan: None,
        market_crashes: Vec::new(),
        unexpected_expenses: Vec::new(),
        results: None,
        last_run: None,
    }
}

/// Phase-based sufficiency check: is the portfolio projected to retirement
/// large enough to fund the grossed-up withdrawals of every retired year?
/// Consecutive years owned by the same band share a row.
pub fn calculate_retirement_readiness(
    profile: &Profile,
) -> Result<ReadinessSummary, SimulationError> {
    let settings = profile
        .settings
        .as_ref()
        .ok_or(SimulationError::MissingInput("profile settings"))?;
    if settings.life_expectancy < settings.retirement_age {
        return Err(SimulationError::InvalidInput(format!(
            "life expectancy {} is below retirement age {}",
            settings.life_expectancy, settings.retirement_age
        )));
    }
    if !settings.inflation_rate.is_finite() || settings.inflation_rate <= -100.0 {
        return Err(SimulationError::InvalidInput(format!(
            "inflation rate {} is not usable",
            settings.inflation_rate
        )));
    }

    let scenario = settings_scenario(settings);
    let rates = settings.exchange_rates();
    let baseline = build_baseline(&scenario, profile, settings, &rates)?;
    let growth = 1.0 + baseline.weighted_return;
    let inflation = 1.0 + settings.inflation_rate / 100.0;

    let current_age = settings.current_age;
    let retirement_age = settings.retirement_age.max(current_age);
    let mut projected = baseline.portfolio_value;
    for years_from_now in 0..retirement_age - current_age {
        let savings = settings.monthly_savings.max(0.0) * 12.0 * inflation.powi(years_from_now as i32);
        projected = (projected + savings) * growth;
    }

    let resolver = ExpenseResolver {
        base_annual: base_annual_expenses(&scenario.expenses, profile),
        inflation_rate: settings.inflation_rate,
        phases: scenario.expense_phases.as_ref(),
        plan: None,
    };
    let tax_config = &settings.tax_config;

    let weights = &baseline.account_weights;
    let mut phases: Vec<PhaseReadiness> = Vec::new();
    for age in retirement_age..=settings.life_expectancy {
        let owner = resolver
            .phases
            .and_then(|p| p.phase_for_age(age))
            .map(|(phase, _)| phase);
        let years_from_now = age - current_age;
        let expenses = resolver.resolve(age, years_from_now).annual;
        let income = calculate_income_at_age(
            age,
            &profile.income_sources,
            &settings.reporting_currency,
            &rates,
            settings.inflation_rate,
            years_from_now,
        )?;
        let net_income =
            income.total_income - calculate_income_tax(income.taxable_income, age, tax_config).net_tax;
        let gap = (expenses - net_income).max(0.0);
        let withdrawal = allocate_withdrawal(
            gap,
            weights,
            baseline.initial_gain_ratio,
            tax_config.cgt.inclusion_rate,
            marginal_rate(income.taxable_income + gap * weights.ra, age, tax_config),
        );
        let discount = growth.powi((age - retirement_age) as i32);
        let present_value = if discount > 0.0 {
            withdrawal.gross_withdrawal / discount
        } else {
            0.0
        };

        match phases.last_mut() {
            Some(row) if row.phase == owner => {
                row.end_age = age;
                row.capital_required += present_value;
            }
            _ => phases.push(PhaseReadiness {
                phase: owner,
                start_age: age,
                end_age: age,
                annual_expenses: expenses,
                annual_net_income: net_income,
                annual_gap: gap,
                annual_gross_withdrawal: withdrawal.gross_withdrawal,
                capital_required: present_value,
            }),
        }
    }

    let capital_required: f64 = phases.iter().map(|p| p.capital_required).sum();
    let difference = projected - capital_required;
    let readiness_percent = if capital_required > 0.0 {
        projected / capital_required * 100.0
    } else {
        100.0
    };

    debug!(
        projected,
        capital_required, readiness_percent, "retirement readiness computed"
    );

    Ok(ReadinessSummary {
        current_portfolio_value: baseline.portfolio_value,
        projected_value_at_retirement: projected,
        weighted_expected_return: baseline.weighted_return * 100.0,
        initial_gain_ratio: baseline.initial_gain_ratio,
        capital_required,
        is_sufficient: difference >= 0.0,
        readiness_percent,
        surplus: difference.max(0.0),
        shortfall: (-difference).max(0.0),
        annual_asset_income: baseline.asset_income.net_total(),
        phases,
    })
}
