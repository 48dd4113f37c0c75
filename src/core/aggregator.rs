use std::collections::{BTreeMap, HashMap};

use super::tax::{
    IMPATRIATE_SALARY_EXEMPTION, apply_shield, irpf_general, irpf_savings, wealth_tax,
};
use super::types::{Asset, Expense, FamilyMember, IncomeType, MemberId, RealizedIncome, TaxResults};

/// Everything about the simulated year that the tax pass needs besides the
/// incomes and assets themselves.
#[derive(Debug, Clone, Copy)]
pub struct TaxContext<'a> {
    pub members: &'a [FamilyMember],
    pub expenses: &'a [Expense],
    pub year_index: u32,
    pub joint_taxation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemberBases {
    pub general_base: f64,
    pub savings_base: f64,
    pub net_wealth: f64,
    pub main_home_value: f64,
}

impl MemberBases {
    fn income_base(&self) -> f64 {
        self.general_base + self.savings_base
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxBreakdown {
    pub total: TaxResults,
    pub per_member: BTreeMap<MemberId, TaxResults>,
    pub bases: BTreeMap<MemberId, MemberBases>,
}

impl TaxBreakdown {
    pub fn member(&self, id: &str) -> TaxResults {
        self.per_member.get(id).copied().unwrap_or_default()
    }
}

pub fn earner_ids(members: &[FamilyMember]) -> Vec<MemberId> {
    members
        .iter()
        .filter(|member| member.is_earner)
        .map(|member| member.id.clone())
        .collect()
}

/// Owners to apportion an item between: its own list, or every earner when it
/// lists nobody.
pub fn resolve_owners<'a>(owners: &'a [MemberId], earners: &'a [MemberId]) -> &'a [MemberId] {
    if owners.is_empty() { earners } else { owners }
}

pub fn compute_taxes(
    ctx: &TaxContext<'_>,
    incomes: &[RealizedIncome],
    assets: &[Asset],
) -> TaxBreakdown {
    let members_by_id: HashMap<&str, &FamilyMember> = ctx
        .members
        .iter()
        .map(|member| (member.id.as_str(), member))
        .collect();
    let impatriate_active = |id: &str| {
        members_by_id
            .get(id)
            .is_some_and(|member| member.impatriate_active_in_year(ctx.year_index))
    };
    let earners = earner_ids(ctx.members);

    let mut bases: BTreeMap<MemberId, MemberBases> = ctx
        .members
        .iter()
        .map(|member| (member.id.clone(), MemberBases::default()))
        .collect();

    for income in incomes {
        if income.stream.is_undeclared || income.realized_amount == 0.0 {
            continue;
        }
        let owners = resolve_owners(&income.stream.owners, &earners);
        if owners.is_empty() {
            continue;
        }
        let share = income.realized_amount / owners.len() as f64;
        for owner in owners {
            let Some(member_bases) = bases.get_mut(owner) else {
                continue;
            };
            if income.stream.income_type.is_general() {
                let taxable = if income.stream.income_type == IncomeType::Salary
                    && impatriate_active(owner)
                {
                    share * (1.0 - IMPATRIATE_SALARY_EXEMPTION)
                } else {
                    share
                };
                member_bases.general_base += taxable;
            } else {
                member_bases.savings_base += share;
            }
        }
    }

    for asset in assets {
        if asset.owners.is_empty() {
            continue;
        }
        let share = asset.wealth_tax_value() / asset.owners.len() as f64;
        for owner in &asset.owners {
            if asset.is_foreign_asset && impatriate_active(owner) {
                continue;
            }
            let Some(member_bases) = bases.get_mut(owner) else {
                continue;
            };
            member_bases.net_wealth += share;
            if asset.is_main_residence {
                member_bases.main_home_value += share;
            }
        }
    }

    let outstanding_mortgage: f64 = ctx
        .expenses
        .iter()
        .map(|expense| expense.outstanding_principal(ctx.year_index))
        .sum();
    if outstanding_mortgage > 0.0 && !earners.is_empty() {
        let per_earner = outstanding_mortgage / earners.len() as f64;
        for earner in &earners {
            if let Some(member_bases) = bases.get_mut(earner) {
                member_bases.net_wealth = (member_bases.net_wealth - per_earner).max(0.0);
            }
        }
    }

    let joint = ctx.joint_taxation.then(|| JointIrpf::new(&earners, &bases));

    let mut breakdown = TaxBreakdown::default();
    for member in ctx.members {
        let Some(member_bases) = bases.get(&member.id).copied() else {
            continue;
        };
        if breakdown.per_member.contains_key(&member.id) {
            continue;
        }
        let impatriate = member.impatriate_active_in_year(ctx.year_index);

        let (general_tax, savings_tax) = match &joint {
            Some(joint) if member.is_earner => joint.share_for(&member_bases),
            _ => (
                irpf_general(member_bases.general_base),
                irpf_savings(member_bases.savings_base),
            ),
        };
        let irpf = general_tax + savings_tax;

        let gross_wealth_tax = wealth_tax(
            member_bases.net_wealth,
            member_bases.main_home_value > 0.0 && !impatriate,
            member_bases.main_home_value,
        );
        let (final_wealth_tax, adjustment) = if impatriate {
            (gross_wealth_tax, 0.0)
        } else {
            let outcome = apply_shield(
                irpf,
                gross_wealth_tax,
                member_bases.general_base,
                member_bases.savings_base,
            );
            (outcome.final_wealth_tax, outcome.adjustment)
        };

        let results = TaxResults {
            irpf,
            irpf_general: general_tax,
            irpf_savings: savings_tax,
            wealth_tax: final_wealth_tax,
            escudo_fiscal_adjustment: adjustment,
        };
        breakdown.total += results;
        breakdown.per_member.insert(member.id.clone(), results);
    }
    breakdown.bases = bases;
    breakdown
}

/// Household IRPF computed once on the summed earner bases.
struct JointIrpf {
    general_tax: f64,
    savings_tax: f64,
    combined_base: f64,
}

impl JointIrpf {
    fn new(earners: &[MemberId], bases: &BTreeMap<MemberId, MemberBases>) -> Self {
        let (general, savings) = earners
            .iter()
            .filter_map(|id| bases.get(id))
            .fold((0.0, 0.0), |(general, savings), member| {
                (general + member.general_base, savings + member.savings_base)
            });
        Self {
            general_tax: irpf_general(general),
            savings_tax: irpf_savings(savings),
            combined_base: general + savings,
        }
    }

    fn share_for(&self, member: &MemberBases) -> (f64, f64) {
        if self.combined_base <= 0.0 {
            return (0.0, 0.0);
        }
        let fraction = member.income_base() / self.combined_base;
        (self.general_tax * fraction, self.savings_tax * fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tax::{MAIN_HOME_EXEMPT_MAX, WEALTH_TAX_EXEMPT_MIN};
    use crate::core::types::{AssetType, IncomeStream};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn member(id: &str, is_earner: bool) -> FamilyMember {
        FamilyMember {
            id: id.to_string(),
            name: format!("Member {id}"),
            age: 45,
            is_earner,
            retirement_age: None,
            has_impatriate_regime: false,
            impatriate_years_remaining: None,
        }
    }

    fn income(income_type: IncomeType, amount: f64, owners: &[&str]) -> RealizedIncome {
        RealizedIncome::new(
            IncomeStream {
                id: "inc".to_string(),
                name: "Income".to_string(),
                income_type,
                amount,
                owners: owners.iter().map(|o| o.to_string()).collect(),
                growth_rate: 0.0,
                start_age: None,
                end_age: None,
                is_undeclared: false,
            },
            amount,
        )
    }

    fn asset(asset_type: AssetType, value: f64, owners: &[&str]) -> Asset {
        Asset {
            id: "asset".to_string(),
            name: "Asset".to_string(),
            asset_type,
            value,
            owners: owners.iter().map(|o| o.to_string()).collect(),
            purchase_value: value,
            is_main_residence: false,
            growth_rate: None,
            cadastral_value: None,
            is_foreign_asset: false,
        }
    }

    fn ctx(members: &[FamilyMember]) -> TaxContext<'_> {
        TaxContext {
            members,
            expenses: &[],
            year_index: 0,
            joint_taxation: false,
        }
    }

    #[test]
    fn income_is_split_between_general_and_savings_bases() {
        let members = vec![member("1", true), member("2", true)];
        let incomes = vec![
            income(IncomeType::Salary, 40_000.0, &["1"]),
            income(IncomeType::Rental, 10_000.0, &["1", "2"]),
            income(IncomeType::Dividend, 6_000.0, &["2"]),
        ];

        let breakdown = compute_taxes(&ctx(&members), &incomes, &[]);

        assert_approx(breakdown.bases["1"].general_base, 45_000.0);
        assert_approx(breakdown.bases["2"].general_base, 5_000.0);
        assert_approx(breakdown.bases["2"].savings_base, 6_000.0);
        assert_approx(breakdown.member("1").irpf_general, irpf_general(45_000.0));
        assert_approx(
            breakdown.total.irpf,
            irpf_general(45_000.0) + irpf_general(5_000.0) + irpf_savings(6_000.0),
        );
    }

    #[test]
    fn ownerless_income_defaults_to_earners_and_undeclared_is_ignored() {
        let members = vec![member("1", true), member("2", true), member("kid", false)];
        let mut hidden = income(IncomeType::Salary, 30_000.0, &["1"]);
        hidden.stream.is_undeclared = true;
        let incomes = vec![income(IncomeType::Interest, 4_000.0, &[]), hidden];

        let breakdown = compute_taxes(&ctx(&members), &incomes, &[]);

        assert_approx(breakdown.bases["1"].savings_base, 2_000.0);
        assert_approx(breakdown.bases["2"].savings_base, 2_000.0);
        assert_approx(breakdown.bases["kid"].savings_base, 0.0);
        assert_approx(breakdown.bases["1"].general_base, 0.0);
    }

    #[test]
    fn cadastral_value_replaces_market_value_for_real_estate() {
        let members = vec![member("1", true)];
        let mut flat = asset(AssetType::RealEstate, 500_000.0, &["1"]);
        flat.cadastral_value = Some(200_000.0);
        let mut fund = asset(AssetType::Fund, 100_000.0, &["1"]);
        fund.cadastral_value = Some(1.0);

        let breakdown = compute_taxes(&ctx(&members), &[], &[flat, fund]);

        assert_approx(breakdown.bases["1"].net_wealth, 300_000.0);
    }

    #[test]
    fn main_home_exemption_reduces_wealth_tax() {
        let members = vec![member("1", true)];
        let mut home = asset(AssetType::RealEstate, 400_000.0, &["1"]);
        home.is_main_residence = true;
        let stocks = asset(AssetType::Stock, 1_000_000.0, &["1"]);

        let breakdown = compute_taxes(&ctx(&members), &[], &[home, stocks]);

        // No income, so the shield keeps only the 25% floor.
        let gross = wealth_tax(1_400_000.0, true, 400_000.0);
        assert_approx(
            gross,
            wealth_tax(1_400_000.0 - MAIN_HOME_EXEMPT_MAX, false, 0.0),
        );
        assert_approx(breakdown.member("1").wealth_tax, gross * 0.25);
        assert_approx(breakdown.member("1").escudo_fiscal_adjustment, gross * 0.75);
    }

    #[test]
    fn impatriate_salary_counts_seventy_percent_and_foreign_assets_are_exempt() {
        let mut expat = member("1", true);
        expat.has_impatriate_regime = true;
        expat.impatriate_years_remaining = Some(5);
        let members = vec![expat];
        let mut foreign = asset(AssetType::Stock, 2_000_000.0, &["1"]);
        foreign.is_foreign_asset = true;
        let local = asset(AssetType::Cash, 900_000.0, &["1"]);
        let incomes = vec![
            income(IncomeType::Salary, 100_000.0, &["1"]),
            income(IncomeType::Pension, 10_000.0, &["1"]),
        ];

        let breakdown = compute_taxes(&ctx(&members), &incomes, &[foreign, local]);

        assert_approx(breakdown.bases["1"].general_base, 80_000.0);
        assert_approx(breakdown.bases["1"].net_wealth, 900_000.0);
        let expected_wealth = wealth_tax(900_000.0, false, 0.0);
        assert_approx(breakdown.member("1").wealth_tax, expected_wealth);
        assert_approx(breakdown.member("1").escudo_fiscal_adjustment, 0.0);
    }

    #[test]
    fn impatriate_regime_lapses_after_remaining_years() {
        let mut expat = member("1", true);
        expat.has_impatriate_regime = true;
        expat.impatriate_years_remaining = Some(2);
        let members = vec![expat];
        let incomes = vec![income(IncomeType::Salary, 50_000.0, &["1"])];
        let context = TaxContext {
            year_index: 2,
            ..ctx(&members)
        };

        let breakdown = compute_taxes(&context, &incomes, &[]);

        assert_approx(breakdown.bases["1"].general_base, 50_000.0);
    }

    #[test]
    fn impatriate_loses_main_home_exemption() {
        let mut expat = member("1", true);
        expat.has_impatriate_regime = true;
        let members = vec![expat];
        let mut home = asset(AssetType::RealEstate, 1_000_000.0, &["1"]);
        home.is_main_residence = true;

        let breakdown = compute_taxes(&ctx(&members), &[], &[home]);

        assert_approx(
            breakdown.member("1").wealth_tax,
            wealth_tax(1_000_000.0, false, 0.0),
        );
    }

    #[test]
    fn mortgage_principal_is_split_between_earners_and_floored() {
        let members = vec![member("1", true), member("2", true), member("kid", false)];
        let expenses = vec![Expense {
            id: "m".to_string(),
            name: "Mortgage".to_string(),
            amount: 12_000.0,
            growth_rate: 0.0,
            start_year: None,
            end_year: Some(10),
            is_mortgage: true,
        }];
        let assets = vec![
            asset(AssetType::Stock, 1_000_000.0, &["1"]),
            asset(AssetType::Stock, 30_000.0, &["2"]),
            asset(AssetType::Stock, 50_000.0, &["kid"]),
        ];
        let context = TaxContext {
            members: &members,
            expenses: &expenses,
            year_index: 4,
            joint_taxation: false,
        };

        let breakdown = compute_taxes(&context, &[], &assets);

        // 12_000 * 6 remaining years = 72_000, 36_000 each.
        assert_approx(breakdown.bases["1"].net_wealth, 964_000.0);
        assert_approx(breakdown.bases["2"].net_wealth, 0.0);
        assert_approx(breakdown.bases["kid"].net_wealth, 50_000.0);
    }

    #[test]
    fn wealth_below_exempt_minimum_is_untaxed() {
        let members = vec![member("1", true)];
        let assets = vec![asset(AssetType::Fund, WEALTH_TAX_EXEMPT_MIN, &["1"])];

        let breakdown = compute_taxes(&ctx(&members), &[], &assets);

        assert_approx(breakdown.total.wealth_tax, 0.0);
    }

    #[test]
    fn joint_taxation_splits_by_base_share() {
        let members = vec![member("1", true), member("2", true)];
        let incomes = vec![
            income(IncomeType::Salary, 60_000.0, &["1"]),
            income(IncomeType::Salary, 20_000.0, &["2"]),
            income(IncomeType::Interest, 20_000.0, &["2"]),
        ];
        let context = TaxContext {
            joint_taxation: true,
            ..ctx(&members)
        };

        let breakdown = compute_taxes(&context, &incomes, &[]);

        let joint_general = irpf_general(80_000.0);
        let joint_savings = irpf_savings(20_000.0);
        assert_approx(breakdown.member("1").irpf_general, joint_general * 0.6);
        assert_approx(breakdown.member("2").irpf_general, joint_general * 0.4);
        assert_approx(breakdown.member("2").irpf_savings, joint_savings * 0.4);
        assert_approx(breakdown.total.irpf, joint_general + joint_savings);
    }

    #[test]
    fn joint_taxation_with_equal_bases_is_split_in_half() {
        let members = vec![member("1", true), member("2", true)];
        let incomes = vec![
            income(IncomeType::Salary, 50_000.0, &["1"]),
            income(IncomeType::Salary, 50_000.0, &["2"]),
        ];
        let joint_ctx = TaxContext {
            joint_taxation: true,
            ..ctx(&members)
        };

        let joint = compute_taxes(&joint_ctx, &incomes, &[]);
        let individual = compute_taxes(&ctx(&members), &incomes, &[]);

        assert_approx(joint.member("1").irpf, joint.total.irpf / 2.0);
        assert_approx(joint.member("1").irpf, joint.member("2").irpf);
        assert!(joint.total.irpf >= individual.total.irpf);
    }

    #[test]
    fn joint_taxation_with_no_income_owes_nothing() {
        let members = vec![member("1", true), member("2", true)];
        let context = TaxContext {
            joint_taxation: true,
            ..ctx(&members)
        };

        let breakdown = compute_taxes(&context, &[], &[]);

        assert_approx(breakdown.total.irpf, 0.0);
    }
}
