use serde::Serialize;

use super::types::{AgeBasedExpensePlan, ExpensePhases, ExpenseSource, PhaseBand, Profile};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpensePhase {
    Working,
    ActiveRetirement,
    SlowerPace,
    LaterYears,
}

impl ExpensePhases {
    /// Bands in evaluation order; the first band containing an age wins.
    pub fn bands(&self) -> impl Iterator<Item = (ExpensePhase, PhaseBand)> + '_ {
        [
            (ExpensePhase::Working, self.working),
            (ExpensePhase::ActiveRetirement, self.active_retirement),
            (ExpensePhase::SlowerPace, self.slower_pace),
            (ExpensePhase::LaterYears, self.later_years),
        ]
        .into_iter()
        .filter_map(|(phase, band)| band.map(|b| (phase, b)))
    }

    pub fn phase_for_age(&self, age: u32) -> Option<(ExpensePhase, PhaseBand)> {
        self.bands().find(|(_, band)| band.contains(age))
    }

    /// A working / active / slower / later split around a retirement age.
    pub fn standard(retirement_age: u32, life_expectancy: u32) -> Self {
        let later_start = retirement_age.saturating_add(20);
        Self {
            working: Some(PhaseBand {
                start_age: 0,
                end_age: retirement_age.saturating_sub(1),
                percentage: 100.0,
            }),
            active_retirement: Some(PhaseBand {
                start_age: retirement_age,
                end_age: retirement_age.saturating_add(9),
                percentage: 100.0,
            }),
            slower_pace: Some(PhaseBand {
                start_age: retirement_age.saturating_add(10),
                end_age: later_start.saturating_sub(1),
                percentage: 85.0,
            }),
            later_years: Some(PhaseBand {
                start_age: later_start,
                end_age: life_expectancy.max(later_start),
                percentage: 75.0,
            }),
        }
    }
}

/// Expense percentage for `age`; 100 when no band matches.
pub fn expense_percentage(age: u32, phases: Option<&ExpensePhases>) -> f64 {
    phases
        .and_then(|p| p.phase_for_age(age))
        .map(|(_, band)| band.percentage.max(0.0))
        .unwrap_or(100.0)
}

/// Annual expenses in today's money from the age-based plan, if it is enabled
/// and has a phase covering `age`.
pub fn age_based_annual_expenses(age: u32, plan: Option<&AgeBasedExpensePlan>) -> Option<f64> {
    let plan = plan.filter(|p| p.enabled)?;
    let phase = plan
        .phases
        .iter()
        .find(|phase| phase.start_age <= age && age <= phase.end_age)?;
    Some(
        phase
            .categories
            .iter()
            .map(|item| item.monthly_amount.max(0.0))
            .sum::<f64>()
            * 12.0,
    )
}

pub fn base_annual_expenses(source: &ExpenseSource, profile: &Profile) -> f64 {
    match source {
        ExpenseSource::Modules => profile.monthly_expenses() * 12.0,
        ExpenseSource::Flat { annual_expenses } => annual_expenses.max(0.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedExpenses {
    pub annual: f64,
    pub percentage: f64,
    pub from_age_based_plan: bool,
}

pub struct ExpenseResolver<'a> {
    pub base_annual: f64,
    pub inflation_rate: f64,
    pub phases: Option<&'a ExpensePhases>,
    pub plan: Option<&'a AgeBasedExpensePlan>,
}

impl ExpenseResolver<'_> {
    pub fn resolve(&self, age: u32, years_from_now: u32) -> ResolvedExpenses {
        let inflation = (1.0 + self.inflation_rate / 100.0).powi(years_from_now as i32);
        if let Some(planned) = age_based_annual_expenses(age, self.plan) {
            return ResolvedExpenses {
                annual: planned * inflation,
                percentage: 100.0,
                from_age_based_plan: true,
            };
        }

        let percentage = expense_percentage(age, self.phases);
        ResolvedExpenses {
            annual: self.base_annual * inflation * percentage / 100.0,
            percentage,
            from_age_based_plan: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgeExpensePhase, ExpenseCategory, ExpenseItem};
    use proptest::prelude::{prop_assert, proptest};

    fn band(start_age: u32, end_age: u32, percentage: f64) -> Option<PhaseBand> {
        Some(PhaseBand {
            start_age,
            end_age,
            percentage,
        })
    }

    fn phases() -> ExpensePhases {
        ExpensePhases {
            working: band(18, 64, 100.0),
            active_retirement: band(65, 74, 110.0),
            slower_pace: band(75, 84, 80.0),
            later_years: band(85, 100, 70.0),
        }
    }

    #[test]
    fn ages_map_to_their_band_percentage() {
        let p = phases();
        assert_eq!(expense_percentage(40, Some(&p)), 100.0);
        assert_eq!(expense_percentage(65, Some(&p)), 110.0);
        assert_eq!(expense_percentage(84, Some(&p)), 80.0);
        assert_eq!(expense_percentage(85, Some(&p)), 70.0);
        assert_eq!(expense_percentage(101, Some(&p)), 100.0);
        assert_eq!(expense_percentage(10, Some(&p)), 100.0);
        assert_eq!(expense_percentage(70, None), 100.0);
    }

    #[test]
    fn first_matching_band_wins_on_overlap() {
        let mut p = phases();
        p.slower_pace = band(70, 84, 80.0);
        assert_eq!(expense_percentage(72, Some(&p)), 110.0);
    }

    #[test]
    fn resolver_applies_inflation_and_phase() {
        let p = phases();
        let resolver = ExpenseResolver {
            base_annual: 100_000.0,
            inflation_rate: 5.0,
            phases: Some(&p),
            plan: None,
        };
        let resolved = resolver.resolve(76, 2);
        assert!((resolved.annual - 100_000.0 * 1.05 * 1.05 * 0.8).abs() < 1e-6);
        assert!(!resolved.from_age_based_plan);
    }

    #[test]
    fn enabled_age_based_plan_takes_precedence() {
        let p = phases();
        let plan = AgeBasedExpensePlan {
            enabled: true,
            phases: vec![AgeExpensePhase {
                name: "travel years".to_string(),
                start_age: 65,
                end_age: 74,
                categories: vec![
                    ExpenseItem {
                        name: "living".to_string(),
                        monthly_amount: 20_000.0,
                    },
                    ExpenseItem {
                        name: "travel".to_string(),
                        monthly_amount: 5_000.0,
                    },
                ],
            }],
        };
        let resolver = ExpenseResolver {
            base_annual: 100_000.0,
            inflation_rate: 0.0,
            phases: Some(&p),
            plan: Some(&plan),
        };
        let planned = resolver.resolve(66, 0);
        assert!(planned.from_age_based_plan);
        assert!((planned.annual - 300_000.0).abs() < 1e-9);

        let outside = resolver.resolve(80, 0);
        assert!(!outside.from_age_based_plan);
        assert!((outside.annual - 80_000.0).abs() < 1e-9);

        let disabled = AgeBasedExpensePlan {
            enabled: false,
            ..plan
        };
        assert_eq!(age_based_annual_expenses(66, Some(&disabled)), None);
    }

    #[test]
    fn module_expenses_sum_categories_and_subcategories() {
        let profile = Profile {
            schema_version: 2,
            assets: vec![],
            income_sources: vec![],
            expense_categories: vec![
                ExpenseCategory {
                    name: "housing".to_string(),
                    monthly_amount: 10_000.0,
                    subcategories: vec![],
                },
                ExpenseCategory {
                    name: "food".to_string(),
                    monthly_amount: 999.0,
                    subcategories: vec![
                        ExpenseItem {
                            name: "groceries".to_string(),
                            monthly_amount: 4_000.0,
                        },
                        ExpenseItem {
                            name: "eating out".to_string(),
                            monthly_amount: 1_000.0,
                        },
                    ],
                },
            ],
            settings: None,
        };
        assert_eq!(base_annual_expenses(&ExpenseSource::Modules, &profile), 180_000.0);
        assert_eq!(
            base_annual_expenses(
                &ExpenseSource::Flat {
                    annual_expenses: 50_000.0
                },
                &profile
            ),
            50_000.0
        );
    }

    proptest! {
        #[test]
        fn prop_percentage_matches_first_containing_band(age in 0u32..120) {
            let p = phases();
            let expected = p
                .bands()
                .find(|(_, b)| b.start_age <= age && age <= b.end_age)
                .map(|(_, b)| b.percentage)
                .unwrap_or(100.0);
            prop_assert!((expense_percentage(age, Some(&p)) - expected).abs() < 1e-12);
        }
    }
}
