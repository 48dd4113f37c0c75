use std::collections::BTreeMap;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

pub type MemberId = String;

pub const DEFAULT_RETIREMENT_AGE: u32 = 67;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub id: MemberId,
    #[serde(default)]
    pub name: String,
    pub age: u32,
    pub is_earner: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retirement_age: Option<u32>,
    /// Art. 56 Bis impatriate regime.
    #[serde(default, rename = "hasBis56Exemption")]
    pub has_impatriate_regime: bool,
    #[serde(
        default,
        rename = "bis56ExemptionYearsRemaining",
        skip_serializing_if = "Option::is_none"
    )]
    pub impatriate_years_remaining: Option<u32>,
}

impl FamilyMember {
    pub fn age_in_year(&self, year_index: u32) -> u32 {
        self.age + year_index
    }

    pub fn is_retired_in_year(&self, year_index: u32) -> bool {
        self.age_in_year(year_index) >= self.retirement_age.unwrap_or(DEFAULT_RETIREMENT_AGE)
    }

    /// The regime lapses once the remaining-years counter is used up; a missing
    /// counter keeps it active for the whole projection.
    pub fn impatriate_active_in_year(&self, year_index: u32) -> bool {
        self.has_impatriate_regime
            && self
                .impatriate_years_remaining
                .is_none_or(|remaining| year_index < remaining)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    RealEstate,
    Stock,
    Fund,
    PensionPlan,
    Cash,
    #[serde(alias = "business")]
    Other,
}

impl AssetType {
    pub fn default_growth_rate(self) -> f64 {
        match self {
            AssetType::Stock | AssetType::Fund | AssetType::PensionPlan => 0.05,
            AssetType::RealEstate => 0.02,
            AssetType::Cash | AssetType::Other => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub value: f64,
    #[serde(default)]
    pub owners: Vec<MemberId>,
    #[serde(default)]
    pub purchase_value: f64,
    #[serde(default)]
    pub is_main_residence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth_rate: Option<f64>,
    #[serde(
        default,
        rename = "valorCatastral",
        skip_serializing_if = "Option::is_none"
    )]
    pub cadastral_value: Option<f64>,
    #[serde(default)]
    pub is_foreign_asset: bool,
}

impl Asset {
    pub fn effective_growth_rate(&self) -> f64 {
        self.growth_rate
            .unwrap_or_else(|| self.asset_type.default_growth_rate())
    }

    /// Value counted towards the wealth-tax base: cadastral value for real
    /// estate when one is recorded, market value otherwise.
    pub fn wealth_tax_value(&self) -> f64 {
        match (self.asset_type, self.cadastral_value) {
            (AssetType::RealEstate, Some(cadastral)) if cadastral > 0.0 => cadastral,
            _ => self.value,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeType {
    Salary,
    Rental,
    Dividend,
    Interest,
    Pension,
    Other,
}

impl IncomeType {
    /// Salary, pension and rental feed the general IRPF base; everything else
    /// is savings income.
    pub fn is_general(self) -> bool {
        matches!(
            self,
            IncomeType::Salary | IncomeType::Pension | IncomeType::Rental
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStream {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub income_type: IncomeType,
    pub amount: f64,
    #[serde(default)]
    pub owners: Vec<MemberId>,
    #[serde(default)]
    pub growth_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_age: Option<u32>,
    #[serde(default)]
    pub is_undeclared: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub growth_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_year: Option<u32>,
    #[serde(default)]
    pub is_mortgage: bool,
}

impl Expense {
    pub fn effective_growth_rate(&self) -> f64 {
        if self.is_mortgage {
            0.0
        } else {
            self.growth_rate
        }
    }

    pub fn is_active_in_year(&self, year_index: u32) -> bool {
        year_index >= self.start_year.unwrap_or(0)
            && self.end_year.is_none_or(|end| year_index < end)
    }

    /// Principal still owed on an active mortgage: one annual payment per
    /// remaining year. Zero for ordinary expenses or open-ended mortgages.
    pub fn outstanding_principal(&self, year_index: u32) -> f64 {
        if !self.is_mortgage || !self.is_active_in_year(year_index) {
            return 0.0;
        }
        match self.end_year {
            Some(end) => self.amount * f64::from(end - year_index),
            None => 0.0,
        }
    }
}

/// An income line with the amount it actually produced this year.
///
/// `realized_amount` is what enters the tax bases; `cash_amount` is what lands
/// in the owners' pockets. They only differ for synthetic drawdown lines, where
/// the whole withdrawal is cash but only the estimated gain is taxable.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedIncome {
    pub stream: IncomeStream,
    pub realized_amount: f64,
    pub cash_amount: f64,
}

impl RealizedIncome {
    pub fn new(stream: IncomeStream, realized_amount: f64) -> Self {
        Self {
            stream,
            realized_amount,
            cash_amount: realized_amount,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxResults {
    pub irpf: f64,
    pub irpf_general: f64,
    pub irpf_savings: f64,
    pub wealth_tax: f64,
    pub escudo_fiscal_adjustment: f64,
}

impl TaxResults {
    pub fn total(&self) -> f64 {
        self.irpf + self.wealth_tax
    }
}

impl AddAssign for TaxResults {
    fn add_assign(&mut self, rhs: Self) {
        self.irpf += rhs.irpf;
        self.irpf_general += rhs.irpf_general;
        self.irpf_savings += rhs.irpf_savings;
        self.wealth_tax += rhs.wealth_tax;
        self.escudo_fiscal_adjustment += rhs.escudo_fiscal_adjustment;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub year: i32,
    pub age: u32,
    pub net_worth: f64,
    pub total_income: f64,
    pub total_expenses: f64,
    pub taxes: TaxResults,
    pub cash_flow: f64,
    pub withdrawal_for_target_income: f64,
    pub cash_drawdown: f64,
    pub stock_drawdown: f64,
    pub asset_values: BTreeMap<String, f64>,
    pub income_breakdown: BTreeMap<String, f64>,
    pub member_taxes: BTreeMap<MemberId, TaxResults>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub years: Vec<YearResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionParams {
    pub start_year: i32,
    pub years_to_project: u32,
    /// Carried for callers; the engine itself works with per-item growth rates.
    pub inflation_rate: f64,
    #[serde(default)]
    pub target_retirement_income: f64,
    #[serde(default)]
    pub do_joint_taxes: bool,
}
