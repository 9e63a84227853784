use serde::Serialize;
use tracing::warn;

use super::types::{AccountType, AccountTypeWeights};

pub const MAX_GAIN_RATIO: f64 = 0.95;
/// Withdrawal tax above this share of the net amount is treated as a bad tax table.
pub const MAX_WITHDRAWAL_TAX_RATIO: f64 = 0.5;

/// Weights of investible value per account type. An empty portfolio is
/// treated as fully taxable.
pub fn account_type_weights<I>(values: I) -> AccountTypeWeights
where
    I: IntoIterator<Item = (AccountType, f64)>,
{
    let mut totals = AccountTypeWeights::default();
    for (account, value) in values {
        let value = value.max(0.0);
        match account {
            AccountType::Tfsa => totals.tfsa += value,
            AccountType::Taxable => totals.taxable += value,
            AccountType::Ra => totals.ra += value,
        }
    }

    let total = totals.tfsa + totals.taxable + totals.ra;
    if total <= 0.0 || !total.is_finite() {
        return AccountTypeWeights {
            tfsa: 0.0,
            taxable: 1.0,
            ra: 0.0,
        };
    }

    AccountTypeWeights {
        tfsa: totals.tfsa / total,
        taxable: totals.taxable / total,
        ra: totals.ra / total,
    }
}

pub fn initial_gain_ratio(value: f64, cost: f64) -> f64 {
    if value <= 0.0 {
        return 0.0;
    }
    ((value - cost) / value).clamp(0.0, MAX_GAIN_RATIO)
}

/// Re-estimates the unrealised gain share without per-lot cost tracking: the
/// original cost is assumed to be drawn down in proportion to everything
/// withdrawn so far.
pub fn estimate_gain_ratio_for_projection(
    initial_ratio: f64,
    initial_cost: f64,
    current_value: f64,
    total_withdrawn: f64,
) -> f64 {
    let initial = if initial_ratio.is_finite() {
        initial_ratio.clamp(0.0, MAX_GAIN_RATIO)
    } else {
        0.0
    };
    if total_withdrawn <= 0.0 || current_value <= 0.0 || !current_value.is_finite() {
        return initial;
    }

    let drawn_share = total_withdrawn / (current_value + total_withdrawn);
    let cost_remaining = initial_cost.max(0.0) * (1.0 - drawn_share);
    let gain = (current_value - cost_remaining).max(0.0);
    let ratio = gain / current_value;
    if ratio.is_finite() {
        ratio.clamp(0.0, MAX_GAIN_RATIO)
    } else {
        initial
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalAllocation {
    pub net_amount: f64,
    pub tfsa_part: f64,
    pub taxable_part: f64,
    pub ra_part: f64,
    pub tfsa_tax: f64,
    pub taxable_tax: f64,
    pub ra_tax: f64,
    pub total_tax: f64,
    pub gross_withdrawal: f64,
    pub tax_capped: bool,
}

/// Splits a net shortfall across account types and grosses it up for tax.
/// RA withdrawals are taxed at the marginal rate rather than a lump-sum table.
pub fn allocate_withdrawal(
    shortfall: f64,
    weights: &AccountTypeWeights,
    gain_ratio: f64,
    inclusion_rate: f64,
    marginal_rate: f64,
) -> WithdrawalAllocation {
    if shortfall <= 0.0 || !shortfall.is_finite() {
        return WithdrawalAllocation::default();
    }

    let tfsa_part = shortfall * weights.tfsa;
    let taxable_part = shortfall * weights.taxable;
    let ra_part = shortfall * weights.ra;

    let rate = marginal_rate.max(0.0) / 100.0;
    let tfsa_tax = 0.0;
    let mut taxable_tax =
        taxable_part * gain_ratio.clamp(0.0, MAX_GAIN_RATIO) * inclusion_rate.max(0.0) / 100.0 * rate;
    let mut ra_tax = ra_part * rate;

    let mut tax_capped = false;
    let cap = shortfall * MAX_WITHDRAWAL_TAX_RATIO;
    let uncapped = taxable_tax + ra_tax;
    if uncapped > cap {
        warn!(
            shortfall,
            withdrawal_tax = uncapped,
            marginal_rate,
            "withdrawal tax exceeds {:.0}% of the amount withdrawn; capping",
            MAX_WITHDRAWAL_TAX_RATIO * 100.0
        );
        let scale = cap / uncapped;
        taxable_tax *= scale;
        ra_tax *= scale;
        tax_capped = true;
    }

    let total_tax = tfsa_tax + taxable_tax + ra_tax;
    WithdrawalAllocation {
        net_amount: shortfall,
        tfsa_part,
        taxable_part,
        ra_part,
        tfsa_tax,
        taxable_tax,
        ra_tax,
        total_tax,
        gross_withdrawal: shortfall + total_tax,
        tax_capped,
    }
}
