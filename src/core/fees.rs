use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeeSettings {
    pub advisor_fee_percent: f64,
    pub platform_fee_percent: f64,
    /// Annual cap on the platform fee, in reporting currency.
    pub platform_fee_cap: Option<f64>,
    pub include_fund_ter: bool,
}

/// Fee settings combined with the portfolio's value-weighted TER, fixed for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    settings: FeeSettings,
    weighted_ter_percent: f64,
}

impl FeeSchedule {
    pub fn new(settings: &FeeSettings, weighted_ter_percent: f64) -> Self {
        Self {
            settings: settings.clone(),
            weighted_ter_percent: weighted_ter_percent.max(0.0),
        }
    }

    pub fn weighted_ter_percent(&self) -> f64 {
        self.weighted_ter_percent
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearFees {
    pub advisor_fee: f64,
    pub platform_fee: f64,
    pub fund_fees: f64,
    pub total_fees: f64,
}

pub fn calculate_scenario_year_fees(portfolio_value: f64, schedule: &FeeSchedule) -> YearFees {
    if !portfolio_value.is_finite() || portfolio_value <= 0.0 {
        return YearFees::default();
    }

    let settings = &schedule.settings;
    let advisor_fee = portfolio_value * settings.advisor_fee_percent.max(0.0) / 100.0;
    let mut platform_fee = portfolio_value * settings.platform_fee_percent.max(0.0) / 100.0;
    if let Some(cap) = settings.platform_fee_cap {
        platform_fee = platform_fee.min(cap.max(0.0));
    }
    let fund_fees = if settings.include_fund_ter {
        portfolio_value * schedule.weighted_ter_percent / 100.0
    } else {
        0.0
    };

    YearFees {
        advisor_fee,
        platform_fee,
        fund_fees,
        total_fees: advisor_fee + platform_fee + fund_fees,
    }
}
