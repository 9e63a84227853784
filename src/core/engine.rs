use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, error, warn};

use super::currency::{ExchangeRates, to_reporting_currency};
use super::error::SimulationError;
use super::expenses::{ExpenseResolver, base_annual_expenses};
use super::fees::{FeeSchedule, calculate_scenario_year_fees};
use super::income::{AssetIncome, calculate_asset_income, calculate_income_at_age};
use super::tax::{calculate_income_tax, marginal_rate};
use super::types::{
    AccountType, AccountTypeWeights, AssetClass, CoverageShare, ExpenseCoverageBreakdown,
    MarketCrash, Profile, ProfileSettings, Scenario, ScenarioMetrics, ScenarioResult,
    TrajectoryPoint,
};
use super::withdrawal::{
    WithdrawalAllocation, account_type_weights, allocate_withdrawal,
    estimate_gain_ratio_for_projection, initial_gain_ratio,
};

/// Longest projection accepted, in years.
pub const MAX_PROJECTION_YEARS: u32 = 120;

/// Runs one deterministic projection. Never panics on bad input: failures are
/// reported through `ScenarioResult::error`.
pub fn run_scenario(scenario: &Scenario, profile: Option<&Profile>) -> ScenarioResult {
    let Some(profile) = profile else {
        return ScenarioResult::failed(SimulationError::MissingInput("profile").to_string());
    };
    let Some(settings) = profile.settings.as_ref() else {
        return ScenarioResult::failed(
            SimulationError::MissingInput("profile settings").to_string(),
        );
    };

    let mut simulator = match ScenarioSimulator::new(scenario, profile, settings) {
        Ok(simulator) => simulator,
        Err(err) => {
            error!(scenario = %scenario.name, error = %err, "scenario setup failed");
            return ScenarioResult::failed(err.to_string());
        }
    };

    match simulator.run() {
        Ok(()) => simulator.into_result(None),
        Err(err) => {
            error!(scenario = %scenario.name, error = %err, "scenario aborted");
            simulator.into_result(Some(err))
        }
    }
}

/// Runs independent scenarios in parallel; results keep the input order.
pub fn run_all_scenarios(scenarios: &[Scenario], profile: Option<&Profile>) -> Vec<ScenarioResult> {
    scenarios
        .par_iter()
        .map(|scenario| run_scenario(scenario, profile))
        .collect()
}

/// Starting-point figures, computed once per run and held fixed.
#[derive(Debug, Clone)]
pub(crate) struct Baseline {
    pub(crate) portfolio_value: f64,
    /// Fraction, including the currency-movement effect.
    pub(crate) weighted_return: f64,
    pub(crate) account_weights: AccountTypeWeights,
    pub(crate) allocation: BTreeMap<AssetClass, f64>,
    pub(crate) initial_gain_ratio: f64,
    /// Cost basis of the sleeve the gain ratio is tracked on.
    gain_sleeve_cost: f64,
    /// Share of the portfolio in that sleeve.
    gain_sleeve_weight: f64,
    pub(crate) weighted_ter: f64,
    pub(crate) asset_income: AssetIncome,
}

pub(crate) fn build_baseline(
    scenario: &Scenario,
    profile: &Profile,
    settings: &ProfileSettings,
    rates: &ExchangeRates,
) -> Result<Baseline, SimulationError> {
    let reporting = settings.reporting_currency.as_str();
    let age = settings.current_age;

    let mut total = 0.0;
    let mut total_cost = 0.0;
    let mut taxable_value = 0.0;
    let mut taxable_cost = 0.0;
    let mut ter_weighted = 0.0;
    let mut currency_effect = 0.0;
    let mut by_class: BTreeMap<AssetClass, f64> = BTreeMap::new();
    let mut by_account = Vec::new();

    for asset in profile.assets.iter().filter(|a| a.is_investible()) {
        let value = finite_or_zero(
            to_reporting_currency(asset.value(), &asset.currency, reporting, rates)?,
            "assetValue",
            age,
        );
        let cost = finite_or_zero(
            to_reporting_currency(asset.cost(), &asset.currency, reporting, rates)?,
            "assetCost",
            age,
        );

        total += value;
        total_cost += cost;
        if asset.account_type == AccountType::Taxable {
            taxable_value += value;
            taxable_cost += cost;
        }
        ter_weighted += value * asset.ter.max(0.0);
        *by_class.entry(asset.asset_class).or_default() += value;
        by_account.push((asset.account_type, value));

        if asset.currency != reporting {
            let movement = scenario
                .currency_movements
                .iter()
                .find(|m| m.currency == asset.currency)
                .map(|m| m.annual_change_percent)
                .unwrap_or(0.0);
            currency_effect += value * movement / 100.0;
        }
    }

    let total = finite_or_zero(total, "initialPortfolioValue", age);
    let total_cost = finite_or_zero(total_cost, "initialCost", age);
    let taxable_value = finite_or_zero(taxable_value, "taxableValue", age);
    let taxable_cost = finite_or_zero(taxable_cost, "taxableCost", age);
    let ter_weighted = finite_or_zero(ter_weighted, "weightedTer", age);
    let currency_effect = finite_or_zero(currency_effect, "currencyEffect", age);

    let allocation: BTreeMap<AssetClass, f64> = if total > 0.0 {
        by_class
            .into_iter()
            .map(|(class, v)| (class, finite_or_zero(v / total, "assetAllocation", age)))
            .collect()
    } else {
        BTreeMap::new()
    };

    let expected_return = |class: AssetClass| {
        scenario
            .expected_returns
            .as_ref()
            .and_then(|returns| returns.get(&class).copied())
            .unwrap_or_else(|| class.default_expected_return())
    };
    let mut weighted_return = allocation
        .iter()
        .map(|(&class, &weight)| weight * expected_return(class) / 100.0)
        .sum::<f64>();
    if total > 0.0 {
        weighted_return += currency_effect / total;
    }

    let weighted_return = finite_or_zero(weighted_return, "weightedExpectedReturn", age);

    let account_weights = account_type_weights(by_account);
    let (gain_value, gain_sleeve_cost, gain_sleeve_weight) = if taxable_value > 0.0 {
        (taxable_value, taxable_cost, account_weights.taxable)
    } else {
        (total, total_cost, 1.0)
    };

    let current_income = calculate_income_at_age(
        settings.current_age,
        &profile.income_sources,
        reporting,
        rates,
        scenario.inflation_rate,
        0,
    )?;
    let current_marginal = marginal_rate(
        current_income.taxable_income,
        settings.current_age,
        &settings.tax_config,
    );
    let asset_income =
        calculate_asset_income(&profile.assets, reporting, rates, current_marginal)?;

    Ok(Baseline {
        portfolio_value: total,
        weighted_return,
        account_weights,
        allocation,
        initial_gain_ratio: finite_or_zero(
            initial_gain_ratio(gain_value, gain_sleeve_cost),
            "initialGainRatio",
            age,
        ),
        gain_sleeve_cost,
        gain_sleeve_weight,
        weighted_ter: if total > 0.0 { ter_weighted / total } else { 0.0 },
        asset_income,
    })
}

fn validate_ages(scenario: &Scenario, settings: &ProfileSettings) -> Result<(), SimulationError> {
    if scenario.life_expectancy < settings.current_age {
        return Err(SimulationError::InvalidInput(format!(
            "life expectancy {} is below current age {}",
            scenario.life_expectancy, settings.current_age
        )));
    }
    if scenario.life_expectancy - settings.current_age > MAX_PROJECTION_YEARS {
        return Err(SimulationError::InvalidInput(format!(
            "projection longer than {MAX_PROJECTION_YEARS} years"
        )));
    }
    if !scenario.inflation_rate.is_finite() || scenario.inflation_rate <= -100.0 {
        return Err(SimulationError::InvalidInput(format!(
            "inflation rate {} is not usable",
            scenario.inflation_rate
        )));
    }
    Ok(())
}

/// Fraction of the portfolio lost in a crash, measured against the
/// allocation snapshot taken at the start of the run.
fn crash_impact(
    crash: &MarketCrash,
    allocation: &BTreeMap<AssetClass, f64>,
) -> Result<f64, SimulationError> {
    let mut impact = 0.0;
    for drop in &crash.drops {
        if !(0.0..=100.0).contains(&drop.drop_percent) {
            return Err(SimulationError::InvalidInput(format!(
                "crash at age {} drops {:?} by {}%",
                crash.age, drop.asset_class, drop.drop_percent
            )));
        }
        impact += allocation.get(&drop.asset_class).copied().unwrap_or(0.0) * drop.drop_percent
            / 100.0;
    }
    Ok(impact.clamp(0.0, 1.0))
}

/// Splits a funding gap into the part the year's expected return covers and
/// the part that erodes capital. Reporting only.
fn classify_gap(gap: f64, expected_return: f64) -> (f64, f64) {
    if gap <= 0.0 {
        return (0.0, 0.0);
    }
    let from_returns = gap.min(expected_return.max(0.0));
    (from_returns, gap - from_returns)
}

fn finite_or_zero(value: f64, field: &'static str, age: u32) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(age, field, value, "non-finite value replaced with 0");
        0.0
    }
}

fn coverage_share(amount: f64, total_expenses: f64) -> CoverageShare {
    let percentage = if total_expenses > 0.0 {
        amount / total_expenses * 100.0
    } else {
        0.0
    };
    CoverageShare { amount, percentage }
}

#[derive(Debug, Default)]
struct RunningTotals {
    withdrawn: f64,
    income: f64,
    expenses: f64,
    fees: f64,
    withdrawal_tax: f64,
    income_tax: f64,
    by_income: f64,
    by_returns: f64,
    by_capital: f64,
    unfunded: f64,
    drawdown_sum: f64,
    drawdown_years: u32,
    drawdown_peak: f64,
    years_with_errors: u32,
    tax_capped_years: u32,
}

struct ScenarioSimulator<'a> {
    scenario: &'a Scenario,
    profile: &'a Profile,
    settings: &'a ProfileSettings,
    rates: ExchangeRates,
    baseline: Baseline,
    fees: FeeSchedule,
    expenses: ExpenseResolver<'a>,
    portfolio_value: f64,
    totals: RunningTotals,
    trajectory: Vec<TrajectoryPoint>,
    success: bool,
    depletion_age: Option<u32>,
}

/// Values committed to the running state once a year completes.
struct YearOutcome {
    point: TrajectoryPoint,
    end_value: f64,
    unfunded: f64,
    tax_capped: bool,
}

impl<'a> ScenarioSimulator<'a> {
    fn new(
        scenario: &'a Scenario,
        profile: &'a Profile,
        settings: &'a ProfileSettings,
    ) -> Result<Self, SimulationError> {
        validate_ages(scenario, settings)?;
        let rates = settings.exchange_rates();
        let baseline = build_baseline(scenario, profile, settings, &rates)?;
        let fees = FeeSchedule::new(&settings.fees, baseline.weighted_ter);
        let expenses = ExpenseResolver {
            base_annual: base_annual_expenses(&scenario.expenses, profile),
            inflation_rate: scenario.inflation_rate,
            phases: scenario.expense_phases.as_ref(),
            plan: scenario.age_based_plan.as_ref(),
        };
        let years = (scenario.life_expectancy - settings.current_age + 1) as usize;

        debug!(
            scenario = %scenario.name,
            years,
            portfolio_value = baseline.portfolio_value,
            weighted_return = baseline.weighted_return,
            gain_ratio = baseline.initial_gain_ratio,
            "starting scenario"
        );

        Ok(Self {
            scenario,
            profile,
            settings,
            rates,
            portfolio_value: baseline.portfolio_value,
            baseline,
            fees,
            expenses,
            totals: RunningTotals::default(),
            trajectory: Vec::with_capacity(years),
            success: true,
            depletion_age: None,
        })
    }

    fn run(&mut self) -> Result<(), SimulationError> {
        let current_age = self.settings.current_age;
        for age in current_age..=self.scenario.life_expectancy {
            let years_from_now = age - current_age;
            match self.step(age, years_from_now) {
                Ok(outcome) => self.commit(age, outcome),
                Err(err @ (SimulationError::InvalidInput(_) | SimulationError::MissingInput(_))) => {
                    return Err(err);
                }
                Err(err) => {
                    error!(age, error = %err, "year failed; carrying value forward");
                    self.totals.years_with_errors += 1;
                    self.trajectory.push(TrajectoryPoint {
                        age,
                        start_value: self.portfolio_value,
                        net_worth: self.portfolio_value,
                        is_retired: age >= self.scenario.retirement_age,
                        error: Some(err.to_string()),
                        ..TrajectoryPoint::default()
                    });
                }
            }
        }
        Ok(())
    }

    fn current_gain_ratio(&self, start_value: f64) -> f64 {
        let weight = self.baseline.gain_sleeve_weight;
        estimate_gain_ratio_for_projection(
            self.baseline.initial_gain_ratio,
            self.baseline.gain_sleeve_cost,
            start_value.max(0.0) * weight,
            self.totals.withdrawn * weight,
        )
    }

    fn step(&self, age: u32, years_from_now: u32) -> Result<YearOutcome, SimulationError> {
        let scenario = self.scenario;
        let tax_config = &self.settings.tax_config;
        let start_value = self.portfolio_value;
        let is_retired = age >= scenario.retirement_age;
        let inflation_factor = (1.0 + scenario.inflation_rate / 100.0).powi(years_from_now as i32);

        let expenses = self.expenses.resolve(age, years_from_now).annual;
        let income = calculate_income_at_age(
            age,
            &self.profile.income_sources,
            &self.settings.reporting_currency,
            &self.rates,
            scenario.inflation_rate,
            years_from_now,
        )
        .map_err(|err| SimulationError::Year {
            age,
            message: err.to_string(),
        })?;
        let income_tax = calculate_income_tax(income.taxable_income, age, tax_config);
        let net_income = income.total_income - income_tax.net_tax;

        let gap = expenses - net_income;
        let covered_by_income = expenses.min(net_income.max(0.0));
        let expected_return = start_value.max(0.0) * self.baseline.weighted_return;
        let (covered_by_returns, covered_by_capital) = classify_gap(gap, expected_return);

        let mut value = start_value;
        let gain_ratio = self.current_gain_ratio(start_value);
        let mut withdrawal = WithdrawalAllocation::default();
        if gap > 0.0 {
            let weights = &self.baseline.account_weights;
            let marginal = marginal_rate(income.taxable_income + gap * weights.ra, age, tax_config);
            withdrawal = allocate_withdrawal(
                gap,
                weights,
                gain_ratio,
                tax_config.cgt.inclusion_rate,
                marginal,
            );
            value -= withdrawal.gross_withdrawal;
        } else if is_retired {
            value -= gap;
        }

        let savings = if is_retired {
            0.0
        } else {
            scenario.monthly_savings.max(0.0) * 12.0 * inflation_factor
        };
        value += savings;

        let growth = value.max(0.0) * self.baseline.weighted_return;
        value += growth;

        let fees = calculate_scenario_year_fees(value, &self.fees).total_fees;
        value -= fees;

        let mut crash_loss = 0.0;
        for crash in scenario.market_crashes.iter().filter(|c| c.age == age) {
            let loss = value.max(0.0) * crash_impact(crash, &self.baseline.allocation)?;
            crash_loss += loss;
            value -= loss;
        }

        let unexpected_expense: f64 = scenario
            .unexpected_expenses
            .iter()
            .filter(|e| e.age == age)
            .map(|e| e.amount.max(0.0))
            .sum();
        value -= unexpected_expense;

        let value = finite_or_zero(value, "portfolioValue", age);
        let unfunded = (-value).max(0.0);
        let end_value = value.max(0.0);

        let drawdown_rate = if start_value > 0.0 {
            withdrawal.gross_withdrawal / start_value * 100.0
        } else {
            0.0
        };

        let point = TrajectoryPoint {
            age,
            start_value: finite_or_zero(start_value, "startValue", age),
            net_worth: end_value,
            expenses: finite_or_zero(expenses, "expenses", age),
            income: finite_or_zero(income.total_income, "income", age),
            net_income: finite_or_zero(net_income, "netIncome", age),
            income_tax: finite_or_zero(income_tax.net_tax, "incomeTax", age),
            withdrawal: finite_or_zero(withdrawal.gross_withdrawal, "withdrawal", age),
            net_withdrawal: finite_or_zero(withdrawal.net_amount, "netWithdrawal", age),
            withdrawal_tax: finite_or_zero(withdrawal.total_tax, "withdrawalTax", age),
            drawdown_rate: finite_or_zero(drawdown_rate, "drawdownRate", age),
            is_retired,
            savings: finite_or_zero(savings, "savings", age),
            growth: finite_or_zero(growth, "growth", age),
            fees: finite_or_zero(fees, "fees", age),
            crash_loss: finite_or_zero(crash_loss, "crashLoss", age),
            unexpected_expense: finite_or_zero(unexpected_expense, "unexpectedExpense", age),
            gain_ratio: finite_or_zero(gain_ratio, "gainRatio", age),
            covered_by_income: finite_or_zero(covered_by_income, "coveredByIncome", age),
            covered_by_returns: finite_or_zero(covered_by_returns, "coveredByReturns", age),
            covered_by_capital: finite_or_zero(covered_by_capital, "coveredByCapital", age),
            error: None,
        };

        Ok(YearOutcome {
            point,
            end_value,
            unfunded,
            tax_capped: withdrawal.tax_capped,
        })
    }

    fn commit(&mut self, age: u32, outcome: YearOutcome) {
        let point = outcome.point;
        let totals = &mut self.totals;
        totals.withdrawn += point.withdrawal;
        totals.income += point.income;
        totals.expenses += point.expenses;
        totals.fees += point.fees;
        totals.withdrawal_tax += point.withdrawal_tax;
        totals.income_tax += point.income_tax;
        totals.by_income += point.covered_by_income;
        totals.by_returns += point.covered_by_returns;
        totals.by_capital += point.covered_by_capital;
        totals.unfunded += outcome.unfunded;
        if outcome.tax_capped {
            totals.tax_capped_years += 1;
        }
        if point.withdrawal > 0.0 && point.start_value > 0.0 {
            totals.drawdown_sum += point.drawdown_rate;
            totals.drawdown_years += 1;
            totals.drawdown_peak = totals.drawdown_peak.max(point.drawdown_rate);
        }

        if outcome.unfunded > 0.0 && self.success {
            self.success = false;
            self.depletion_age = Some(age);
            debug!(age, "portfolio depleted");
        }

        self.portfolio_value = outcome.end_value;
        self.trajectory.push(point);
    }

    fn into_result(self, error: Option<SimulationError>) -> ScenarioResult {
        let last_age = self
            .trajectory
            .last()
            .map(|point| point.age)
            .unwrap_or(self.settings.current_age);
        let checked = |value: f64, field: &'static str| finite_or_zero(value, field, last_age);

        let totals = RunningTotals {
            withdrawn: checked(self.totals.withdrawn, "totalWithdrawn"),
            income: checked(self.totals.income, "totalIncome"),
            expenses: checked(self.totals.expenses, "totalExpenses"),
            fees: checked(self.totals.fees, "totalFees"),
            withdrawal_tax: checked(self.totals.withdrawal_tax, "totalWithdrawalTax"),
            income_tax: checked(self.totals.income_tax, "totalIncomeTax"),
            by_income: checked(self.totals.by_income, "coveredByIncome"),
            by_returns: checked(self.totals.by_returns, "coveredByReturns"),
            by_capital: checked(self.totals.by_capital, "coveredByCapital"),
            unfunded: checked(self.totals.unfunded, "unfundedExpenses"),
            drawdown_sum: checked(self.totals.drawdown_sum, "averageDrawdownRate"),
            drawdown_peak: checked(self.totals.drawdown_peak, "peakDrawdownRate"),
            ..self.totals
        };
        let final_value = checked(
            self.trajectory
                .last()
                .map(|point| point.net_worth)
                .unwrap_or(self.portfolio_value),
            "finalValue",
        );
        let success = self.success && error.is_none();

        let mut warnings = Vec::new();
        if totals.tax_capped_years > 0 {
            warnings.push(format!(
                "withdrawal tax was capped in {} year(s); check the tax table",
                totals.tax_capped_years
            ));
        }
        if totals.years_with_errors > 0 {
            warnings.push(format!(
                "{} year(s) could not be computed and carry the previous value",
                totals.years_with_errors
            ));
        }

        let metrics = ScenarioMetrics {
            initial_portfolio_value: checked(
                self.baseline.portfolio_value,
                "initialPortfolioValue",
            ),
            weighted_expected_return: checked(
                self.baseline.weighted_return * 100.0,
                "weightedExpectedReturn",
            ),
            initial_gain_ratio: checked(self.baseline.initial_gain_ratio, "initialGainRatio"),
            account_weights: self.baseline.account_weights,
            asset_allocation: self.baseline.allocation,
            weighted_ter: checked(self.fees.weighted_ter_percent(), "weightedTer"),
            initial_annual_asset_income: checked(
                self.baseline.asset_income.net_total(),
                "initialAnnualAssetIncome",
            ),
            average_drawdown_rate: if totals.drawdown_years > 0 {
                totals.drawdown_sum / f64::from(totals.drawdown_years)
            } else {
                0.0
            },
            peak_drawdown_rate: totals.drawdown_peak,
            unfunded_expenses: totals.unfunded,
            years_simulated: self.trajectory.len() as u32,
            years_with_errors: totals.years_with_errors,
        };

        ScenarioResult {
            trajectory: self.trajectory,
            success,
            depletion_age: self.depletion_age,
            final_value,
            shortfall: (!success).then_some(final_value.abs()),
            total_withdrawn: totals.withdrawn,
            total_income: totals.income,
            total_expenses: totals.expenses,
            total_fees: totals.fees,
            total_withdrawal_tax: totals.withdrawal_tax,
            total_income_tax: totals.income_tax,
            expense_coverage_breakdown: ExpenseCoverageBreakdown {
                by_income: coverage_share(totals.by_income, totals.expenses),
                by_returns: coverage_share(totals.by_returns, totals.expenses),
                by_capital_drawdown: coverage_share(totals.by_capital, totals.expenses),
            },
            metrics,
            warnings,
            error: error.map(|err| err.to_string()),
        }
    }
}
