mod aggregator;
mod engine;
mod store;
mod tax;
mod types;

pub use aggregator::{MemberBases, TaxBreakdown, TaxContext, compute_taxes};
pub use engine::{Drawdown, run_drawdown, run_projection};
pub use store::AssetStore;
pub use tax::{
    Bracket, FiscalTables, MAIN_HOME_EXEMPT_MAX, ShieldOutcome, WEALTH_TAX_EXEMPT_MIN,
    WealthBracket, apply_shield, fiscal_tables, irpf_general, irpf_savings, tax_on_bracketed_base,
    wealth_tax,
};
pub use types::{
    Asset, AssetType, DEFAULT_RETIREMENT_AGE, Expense, FamilyMember, IncomeStream, IncomeType,
    MemberId, ProjectionParams, RealizedIncome, SimulationResult, TaxResults, YearResult,
};
