use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use super::aggregator::{TaxBreakdown, TaxContext, compute_taxes, earner_ids, resolve_owners};
use super::store::{
    AssetStore, debt_asset_id, new_debt_asset, new_savings_asset, savings_asset_id,
};
use super::tax::DRAWDOWN_GAIN_FRACTION;
use super::types::{
    Asset, AssetType, Expense, FamilyMember, IncomeStream, IncomeType, MemberId,
    ProjectionParams, RealizedIncome, SimulationResult, YearResult,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drawdown {
    pub lines: Vec<RealizedIncome>,
    pub cash: f64,
    pub stock: f64,
}

impl Drawdown {
    pub fn total(&self) -> f64 {
        self.cash + self.stock
    }
}

struct Household<'a> {
    members: &'a [FamilyMember],
    earners: Vec<MemberId>,
}

impl Household<'_> {
    fn ages(&self, year_index: u32) -> HashMap<&str, u32> {
        self.members
            .iter()
            .map(|member| (member.id.as_str(), member.age_in_year(year_index)))
            .collect()
    }

    fn any_retired(&self, year_index: u32) -> bool {
        self.members
            .iter()
            .any(|member| member.is_retired_in_year(year_index))
    }
}

/// Working copies owned by one projection run. The caller's collections are
/// cloned in and never touched again.
struct ProjectionState {
    assets: AssetStore,
    incomes: Vec<IncomeStream>,
    expenses: Vec<Expense>,
}

pub fn run_projection(
    members: &[FamilyMember],
    assets: &[Asset],
    incomes: &[IncomeStream],
    expenses: &[Expense],
    params: &ProjectionParams,
) -> SimulationResult {
    let household = Household {
        members,
        earners: earner_ids(members),
    };
    let mut state = ProjectionState {
        assets: AssetStore::new(assets.to_vec()),
        incomes: incomes.to_vec(),
        expenses: expenses.to_vec(),
    };

    let mut years = Vec::with_capacity(params.years_to_project as usize);
    for year_index in 0..params.years_to_project {
        years.push(simulate_year(&household, &mut state, params, year_index));
    }
    SimulationResult { years }
}

fn simulate_year(
    household: &Household<'_>,
    state: &mut ProjectionState,
    params: &ProjectionParams,
    year_index: u32,
) -> YearResult {
    let ages = household.ages(year_index);

    if year_index > 0 {
        for income in &mut state.incomes {
            income.amount *= 1.0 + income.growth_rate;
        }
        for expense in &mut state.expenses {
            expense.amount *= 1.0 + expense.effective_growth_rate();
        }
    }

    let total_expenses: f64 = state
        .expenses
        .iter()
        .filter(|expense| expense.is_active_in_year(year_index))
        .map(|expense| expense.amount)
        .sum();

    let mut realized: Vec<RealizedIncome> = state
        .incomes
        .iter()
        .map(|income| {
            let active = income_is_active(income, &ages, &household.earners);
            RealizedIncome::new(income.clone(), if active { income.amount } else { 0.0 })
        })
        .collect();
    let gross_fixed: f64 = realized.iter().map(|income| income.cash_amount).sum();

    let ctx = TaxContext {
        members: household.members,
        expenses: &state.expenses,
        year_index,
        joint_taxation: params.do_joint_taxes,
    };
    let pre_drawdown = compute_taxes(&ctx, &realized, state.assets.as_slice());
    let net_income_fixed = gross_fixed - pre_drawdown.total.total();

    let target = params.target_retirement_income;
    let drawdown = if household.any_retired(year_index)
        && target > 0.0
        && net_income_fixed < target
    {
        let deficit = target - net_income_fixed;
        let drawdown = run_drawdown(&mut state.assets, deficit, year_index);
        debug!(
            year_index,
            deficit,
            drawn = drawdown.total(),
            "retirement income top-up"
        );
        drawdown
    } else {
        Drawdown::default()
    };
    let total_income = gross_fixed + drawdown.total();
    realized.extend(drawdown.lines.iter().cloned());

    let taxes = compute_taxes(&ctx, &realized, state.assets.as_slice());
    let cash_flow = total_income - total_expenses - taxes.total.total();

    let opening_shares = owner_shares(&state.assets);
    for (member, flow) in member_cash_flows(household, &realized, &taxes, total_expenses) {
        apply_member_flow(&mut state.assets, &opening_shares, member, flow);
    }

    for asset in state.assets.iter_mut() {
        asset.value *= 1.0 + asset.effective_growth_rate();
    }

    let outstanding_mortgage: f64 = state
        .expenses
        .iter()
        .map(|expense| expense.outstanding_principal(year_index))
        .sum();
    let net_worth = state.assets.total_value() - outstanding_mortgage;

    let mut asset_values = BTreeMap::new();
    for asset in state.assets.iter() {
        *asset_values.entry(asset.name.clone()).or_insert(0.0) += asset.value;
    }
    let mut income_breakdown = BTreeMap::new();
    for income in &realized {
        *income_breakdown
            .entry(income.stream.name.clone())
            .or_insert(0.0) += income.cash_amount;
    }

    debug!(
        year_index,
        net_worth,
        cash_flow,
        total_tax = taxes.total.total(),
        "projected year"
    );

    YearResult {
        year: params.start_year + year_index as i32,
        age: household
            .members
            .first()
            .map_or(0, |member| member.age_in_year(year_index)),
        net_worth,
        total_income,
        total_expenses,
        taxes: taxes.total,
        cash_flow,
        withdrawal_for_target_income: drawdown.total(),
        cash_drawdown: drawdown.cash,
        stock_drawdown: drawdown.stock,
        asset_values,
        income_breakdown,
        member_taxes: taxes.per_member,
    }
}

/// Age gates are checked against the stream's first owner.
fn income_is_active(
    income: &IncomeStream,
    ages: &HashMap<&str, u32>,
    earners: &[MemberId],
) -> bool {
    let owners = resolve_owners(&income.owners, earners);
    let Some(age) = owners.first().and_then(|id| ages.get(id.as_str())) else {
        return true;
    };
    if income.start_age.is_some_and(|start| *age < start) {
        return false;
    }
    if income.end_age.is_some_and(|end| *age >= end) {
        return false;
    }
    true
}

/// Sells cash first, then stocks and funds from lowest to highest growth,
/// until `deficit` is covered or nothing liquid is left. Each sale becomes an
/// income line: the full amount is cash, a fixed fraction of it is taxed as
/// savings income.
pub fn run_drawdown(store: &mut AssetStore, deficit: f64, year_index: u32) -> Drawdown {
    let mut candidates: Vec<usize> = store
        .iter()
        .enumerate()
        .filter(|(_, asset)| {
            matches!(
                asset.asset_type,
                AssetType::Cash | AssetType::Stock | AssetType::Fund
            ) && asset.value > 0.0
        })
        .map(|(position, _)| position)
        .collect();
    {
        let assets = store.as_slice();
        candidates.sort_by(|&a, &b| {
            let (a, b) = (&assets[a], &assets[b]);
            (a.asset_type != AssetType::Cash)
                .cmp(&(b.asset_type != AssetType::Cash))
                .then(a.effective_growth_rate().total_cmp(&b.effective_growth_rate()))
        });
    }

    let mut drawdown = Drawdown::default();
    let mut remaining = deficit;
    for position in candidates {
        if remaining <= 0.0 {
            break;
        }
        let asset = store.at_mut(position);
        let withdrawn = asset.value.min(remaining);
        asset.value -= withdrawn;
        remaining -= withdrawn;

        if asset.asset_type == AssetType::Cash {
            drawdown.cash += withdrawn;
        } else {
            drawdown.stock += withdrawn;
        }
        let gain = withdrawn * DRAWDOWN_GAIN_FRACTION;
        drawdown.lines.push(RealizedIncome {
            stream: IncomeStream {
                id: format!("drawdown-{}-{year_index}", asset.id),
                name: format!("Sale of {}", asset.name),
                income_type: IncomeType::Other,
                amount: gain,
                owners: asset.owners.clone(),
                growth_rate: 0.0,
                start_age: None,
                end_age: None,
                is_undeclared: false,
            },
            realized_amount: gain,
            cash_amount: withdrawn,
        });
    }
    drawdown
}

/// Net cash position of each earner for the year: their share of the cash
/// that came in, minus their own taxes, minus an equal slice of expenses.
fn member_cash_flows<'a>(
    household: &'a Household<'_>,
    realized: &[RealizedIncome],
    taxes: &TaxBreakdown,
    total_expenses: f64,
) -> Vec<(&'a FamilyMember, f64)> {
    if household.earners.is_empty() {
        return Vec::new();
    }

    let mut cash_in: HashMap<&str, f64> = HashMap::new();
    for income in realized {
        let owners = resolve_owners(&income.stream.owners, &household.earners);
        if owners.is_empty() || income.cash_amount == 0.0 {
            continue;
        }
        let share = income.cash_amount / owners.len() as f64;
        for owner in owners {
            *cash_in.entry(owner.as_str()).or_insert(0.0) += share;
        }
    }

    let expense_share = total_expenses / household.earners.len() as f64;
    household
        .members
        .iter()
        .filter(|member| member.is_earner)
        .map(|member| {
            let tax = taxes.member(&member.id).total();
            let income = cash_in.get(member.id.as_str()).copied().unwrap_or(0.0);
            (member, income - tax - expense_share)
        })
        .filter(|(_, flow)| *flow != 0.0)
        .collect()
}

/// Each owner's slice of every asset, fixed before the cascade so co-owners
/// drawing on the same asset in one year each get their full part.
fn owner_shares(store: &AssetStore) -> Vec<f64> {
    store
        .iter()
        .map(|asset| {
            if asset.owners.is_empty() {
                0.0
            } else {
                asset.value / asset.owners.len() as f64
            }
        })
        .collect()
}

fn apply_member_flow(
    store: &mut AssetStore,
    opening_shares: &[f64],
    member: &FamilyMember,
    flow: f64,
) {
    let mut flow = flow;

    if flow > 0.0 {
        if let Some(debt) = store.get_mut(&debt_asset_id(&member.id)) {
            if debt.value < 0.0 {
                let repayment = flow.min(-debt.value);
                debt.value += repayment;
                flow -= repayment;
            }
        }
    }

    if flow < 0.0 {
        flow += liquidate_member_assets(store, opening_shares, &member.id, -flow);
    }

    if flow == 0.0 {
        return;
    }

    let savings = store.find_or_insert_with(&savings_asset_id(&member.id), || {
        trace!(member = %member.id, "opening savings asset");
        new_savings_asset(&member.id, &member.name)
    });
    savings.value += flow;
    if savings.value < 0.0 {
        let shortfall = savings.value;
        savings.value = 0.0;
        let debt = store.find_or_insert_with(&debt_asset_id(&member.id), || {
            trace!(member = %member.id, "opening debt asset");
            new_debt_asset(&member.id, &member.name)
        });
        debt.value += shortfall;
    }
}

/// Raises up to `needed` from the member's share of liquid holdings: cash,
/// then other investments, then stocks and funds by ascending growth. Shares
/// come from `opening_shares`; assets opened during the cascade are not
/// drawn on. Returns the amount raised.
fn liquidate_member_assets(
    store: &mut AssetStore,
    opening_shares: &[f64],
    member_id: &str,
    needed: f64,
) -> f64 {
    fn rank(asset_type: AssetType) -> u8 {
        match asset_type {
            AssetType::Cash => 0,
            AssetType::Other => 1,
            _ => 2,
        }
    }

    let mut candidates: Vec<usize> = store
        .iter()
        .enumerate()
        .filter(|(_, asset)| {
            matches!(
                asset.asset_type,
                AssetType::Cash | AssetType::Other | AssetType::Stock | AssetType::Fund
            ) && asset.value > 0.0
                && asset.owners.iter().any(|owner| owner == member_id)
        })
        .map(|(position, _)| position)
        .collect();
    {
        let assets = store.as_slice();
        candidates.sort_by(|&a, &b| {
            let (a, b) = (&assets[a], &assets[b]);
            rank(a.asset_type)
                .cmp(&rank(b.asset_type))
                .then(a.effective_growth_rate().total_cmp(&b.effective_growth_rate()))
        });
    }

    let mut remaining = needed;
    for position in candidates {
        if remaining <= 0.0 {
            break;
        }
        let Some(&share) = opening_shares.get(position) else {
            continue;
        };
        let asset = store.at_mut(position);
        let taken = share.min(asset.value).min(remaining);
        asset.value -= taken;
        remaining -= taken;
    }
    needed - remaining
}
