//! Gipuzkoa 2024 fiscal tables and the pure tax functions built on them.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    /// Upper limit of the bracket; `f64::INFINITY` for the top one.
    #[serde(serialize_with = "serialize_limit")]
    pub limit: f64,
    pub rate: f64,
}

/// Wealth-tax scale row: tax owed at `threshold`, plus `rate` on the rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WealthBracket {
    pub threshold: f64,
    pub tax_at_threshold: f64,
    pub rate: f64,
}

pub const IRPF_GENERAL_BRACKETS: [Bracket; 8] = [
    Bracket { limit: 17_280.0, rate: 0.23 },
    Bracket { limit: 34_560.0, rate: 0.28 },
    Bracket { limit: 51_840.0, rate: 0.35 },
    Bracket { limit: 74_030.0, rate: 0.40 },
    Bracket { limit: 102_530.0, rate: 0.45 },
    Bracket { limit: 136_670.0, rate: 0.46 },
    Bracket { limit: 199_240.0, rate: 0.47 },
    Bracket { limit: f64::INFINITY, rate: 0.49 },
];

pub const IRPF_SAVINGS_BRACKETS: [Bracket; 5] = [
    Bracket { limit: 2_500.0, rate: 0.20 },
    Bracket { limit: 10_000.0, rate: 0.21 },
    Bracket { limit: 15_000.0, rate: 0.22 },
    Bracket { limit: 30_000.0, rate: 0.23 },
    Bracket { limit: f64::INFINITY, rate: 0.25 },
];

pub const WEALTH_TAX_BRACKETS: [WealthBracket; 8] = [
    WealthBracket { threshold: 0.0, tax_at_threshold: 0.0, rate: 0.002 },
    WealthBracket { threshold: 167_129.0, tax_at_threshold: 334.26, rate: 0.003 },
    WealthBracket { threshold: 334_252.0, tax_at_threshold: 835.63, rate: 0.005 },
    WealthBracket { threshold: 668_499.0, tax_at_threshold: 2_506.86, rate: 0.009 },
    WealthBracket { threshold: 1_336_999.0, tax_at_threshold: 8_523.36, rate: 0.013 },
    WealthBracket { threshold: 2_673_999.0, tax_at_threshold: 25_904.36, rate: 0.017 },
    WealthBracket { threshold: 5_347_998.0, tax_at_threshold: 71_362.35, rate: 0.021 },
    WealthBracket { threshold: 10_695_996.0, tax_at_threshold: 183_670.30, rate: 0.025 },
];

pub const WEALTH_TAX_EXEMPT_MIN: f64 = 700_000.0;
pub const MAIN_HOME_EXEMPT_MAX: f64 = 300_000.0;

/// Income plus wealth tax may not exceed this share of the IRPF base.
pub const SHIELD_CEILING_RATIO: f64 = 0.65;
/// At most this share of the wealth tax can be removed by the shield.
pub const SHIELD_MAX_REDUCTION: f64 = 0.75;

/// Share of impatriate salary that stays out of the general base.
pub const IMPATRIATE_SALARY_EXEMPTION: f64 = 0.30;

/// Fixed fraction of every retirement withdrawal (cash, stock or fund) taxed
/// as a capital gain. This is a flat approximation; purchase basis is not
/// tracked.
pub const DRAWDOWN_GAIN_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShieldOutcome {
    pub final_wealth_tax: f64,
    pub adjustment: f64,
}

pub fn tax_on_bracketed_base(base: f64, brackets: &[Bracket]) -> f64 {
    if base <= 0.0 {
        return 0.0;
    }

    let mut tax = 0.0;
    let mut previous_limit = 0.0;
    for bracket in brackets {
        tax += (base.min(bracket.limit) - previous_limit) * bracket.rate;
        if base <= bracket.limit {
            break;
        }
        previous_limit = bracket.limit;
    }
    tax
}

pub fn irpf_general(base: f64) -> f64 {
    tax_on_bracketed_base(base, &IRPF_GENERAL_BRACKETS)
}

pub fn irpf_savings(base: f64) -> f64 {
    tax_on_bracketed_base(base, &IRPF_SAVINGS_BRACKETS)
}

/// Wealth tax on `net_wealth`. `main_home_value` is subtracted (up to
/// [`MAIN_HOME_EXEMPT_MAX`]) only when `apply_main_home_exemption` is set.
pub fn wealth_tax(net_wealth: f64, apply_main_home_exemption: bool, main_home_value: f64) -> f64 {
    let mut taxable = net_wealth;
    if apply_main_home_exemption {
        taxable -= main_home_value.clamp(0.0, MAIN_HOME_EXEMPT_MAX);
    }
    taxable -= WEALTH_TAX_EXEMPT_MIN;
    if taxable <= 0.0 {
        return 0.0;
    }

    WEALTH_TAX_BRACKETS
        .iter()
        .rev()
        .find(|bracket| taxable >= bracket.threshold)
        .map(|bracket| bracket.tax_at_threshold + (taxable - bracket.threshold) * bracket.rate)
        .unwrap_or(0.0)
}

/// Escudo fiscal: trims wealth tax so that income plus wealth tax stays under
/// the ceiling, never below a quarter of the original wealth tax.
pub fn apply_shield(
    income_tax: f64,
    wealth_tax: f64,
    general_base: f64,
    savings_base: f64,
) -> ShieldOutcome {
    let ceiling = (general_base + savings_base) * SHIELD_CEILING_RATIO;
    let total = income_tax + wealth_tax;
    if total <= ceiling {
        return ShieldOutcome {
            final_wealth_tax: wealth_tax,
            adjustment: 0.0,
        };
    }

    let excess = total - ceiling;
    let max_reduction = (wealth_tax * SHIELD_MAX_REDUCTION).max(0.0);
    let adjustment = excess.min(max_reduction);
    ShieldOutcome {
        final_wealth_tax: wealth_tax - adjustment,
        adjustment,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiscalTables {
    pub irpf_general_brackets: Vec<Bracket>,
    pub irpf_savings_brackets: Vec<Bracket>,
    pub wealth_tax_brackets: Vec<WealthBracket>,
    pub wealth_tax_exempt_min: f64,
    pub main_home_exempt_max: f64,
    pub shield_ceiling_ratio: f64,
    pub shield_max_reduction: f64,
    pub impatriate_salary_exemption: f64,
    pub drawdown_gain_fraction: f64,
}

pub fn fiscal_tables() -> FiscalTables {
    FiscalTables {
        irpf_general_brackets: IRPF_GENERAL_BRACKETS.to_vec(),
        irpf_savings_brackets: IRPF_SAVINGS_BRACKETS.to_vec(),
        wealth_tax_brackets: WEALTH_TAX_BRACKETS.to_vec(),
        wealth_tax_exempt_min: WEALTH_TAX_EXEMPT_MIN,
        main_home_exempt_max: MAIN_HOME_EXEMPT_MAX,
        shield_ceiling_ratio: SHIELD_CEILING_RATIO,
        shield_max_reduction: SHIELD_MAX_REDUCTION,
        impatriate_salary_exemption: IMPATRIATE_SALARY_EXEMPTION,
        drawdown_gain_fraction: DRAWDOWN_GAIN_FRACTION,
    }
}

// JSON has no infinity; the open top bracket is written as null.
fn serialize_limit<S: serde::Serializer>(limit: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if limit.is_finite() {
        serializer.serialize_some(limit)
    } else {
        serializer.serialize_none()
    }
}
