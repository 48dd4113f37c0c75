//! Full-state backup documents and merging of partial imports.
//!
//! A backup is the JSON snapshot the planner inputs are restored from:
//! `version`, `members`, `assets`, `incomes`, `expenses`,
//! `settings.targetRetirementIncome` and a `timestamp`. Partial imports carry
//! loose asset/income/expense rows that get defaulted before they join a
//! backup.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{
    Asset, AssetType, Expense, FamilyMember, IncomeStream, IncomeType, MemberId,
    ProjectionParams, SimulationResult, run_projection,
};
use crate::error::{PlannerError, Result};

pub const BACKUP_VERSION: u32 = 1;

const IMPORT_GROWTH_RATE: f64 = 0.02;
const IMPORT_MARKET_GROWTH_RATE: f64 = 0.05;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    #[serde(default)]
    pub target_retirement_income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub version: u32,
    pub members: Vec<FamilyMember>,
    pub assets: Vec<Asset>,
    pub incomes: Vec<IncomeStream>,
    pub expenses: Vec<Expense>,
    pub settings: BackupSettings,
    pub timestamp: String,
}

// Mirrors `BackupDocument` with the required keys left optional, so a
// document missing them is reported as a bad backup rather than a serde error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBackup {
    version: Option<u32>,
    members: Option<Vec<FamilyMember>>,
    #[serde(default)]
    assets: Vec<Asset>,
    #[serde(default)]
    incomes: Vec<IncomeStream>,
    #[serde(default)]
    expenses: Vec<Expense>,
    #[serde(default)]
    settings: BackupSettings,
    #[serde(default)]
    timestamp: String,
}

impl TryFrom<RawBackup> for BackupDocument {
    type Error = PlannerError;

    fn try_from(raw: RawBackup) -> Result<Self> {
        let (Some(version), Some(members)) = (raw.version.filter(|v| *v > 0), raw.members) else {
            return Err(PlannerError::InvalidBackup(
                "Invalid backup file format".to_string(),
            ));
        };
        Ok(Self {
            version,
            members,
            assets: raw.assets,
            incomes: raw.incomes,
            expenses: raw.expenses,
            settings: raw.settings,
            timestamp: raw.timestamp,
        })
    }
}

impl BackupDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str::<RawBackup>(json)?.try_into()
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value::<RawBackup>(value)?.try_into()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let backup = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            members = backup.members.len(),
            assets = backup.assets.len(),
            "loaded backup"
        );
        Ok(backup)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn project(&self, params: &ProjectionParams) -> SimulationResult {
        run_projection(
            &self.members,
            &self.assets,
            &self.incomes,
            &self.expenses,
            params,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialAsset {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub asset_type: Option<String>,
    pub value: Option<f64>,
    pub owners: Option<Vec<MemberId>>,
    pub growth_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialIncome {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub income_type: Option<String>,
    pub amount: Option<f64>,
    pub owners: Option<Vec<MemberId>>,
    pub growth_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialExpense {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub growth_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialImport {
    pub assets: Vec<PartialAsset>,
    pub incomes: Vec<PartialIncome>,
    pub expenses: Vec<PartialExpense>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub assets: usize,
    pub incomes: usize,
    pub expenses: usize,
}

/// Appends defaulted copies of the imported rows to `backup`.
///
/// Rows get fresh numeric ids after the highest numeric id already present.
/// Assets and incomes without owners go to the first family member.
pub fn merge_partial_import(
    backup: &mut BackupDocument,
    import: PartialImport,
) -> Result<ImportSummary> {
    let Some(default_owner) = backup.members.first().map(|member| member.id.clone()) else {
        return Err(PlannerError::InvalidInput(
            "cannot import into a backup without family members".to_string(),
        ));
    };
    let owners_or_default = |owners: Option<Vec<MemberId>>| match owners {
        Some(owners) if !owners.is_empty() => owners,
        _ => vec![default_owner.clone()],
    };

    let summary = ImportSummary {
        assets: import.assets.len(),
        incomes: import.incomes.len(),
        expenses: import.expenses.len(),
    };

    let first_asset_id = next_id(backup.assets.iter().map(|asset| asset.id.as_str()));
    for (offset, row) in import.assets.into_iter().enumerate() {
        let asset_type = row
            .asset_type
            .as_deref()
            .map_or(AssetType::Other, asset_type_from_label);
        let value = row.value.unwrap_or(0.0);
        let growth_rate = row.growth_rate.unwrap_or(match asset_type {
            AssetType::Stock | AssetType::Fund => IMPORT_MARKET_GROWTH_RATE,
            _ => IMPORT_GROWTH_RATE,
        });
        backup.assets.push(Asset {
            id: (first_asset_id + offset as u64).to_string(),
            name: row.name.unwrap_or_else(|| "Imported Asset".to_string()),
            asset_type,
            value,
            owners: owners_or_default(row.owners),
            purchase_value: value,
            is_main_residence: false,
            growth_rate: Some(growth_rate),
            cadastral_value: None,
            is_foreign_asset: false,
        });
    }

    let first_income_id = next_id(backup.incomes.iter().map(|income| income.id.as_str()));
    for (offset, row) in import.incomes.into_iter().enumerate() {
        backup.incomes.push(IncomeStream {
            id: (first_income_id + offset as u64).to_string(),
            name: row.name.unwrap_or_else(|| "Imported Income".to_string()),
            income_type: row
                .income_type
                .as_deref()
                .map_or(IncomeType::Other, income_type_from_label),
            amount: row.amount.unwrap_or(0.0),
            owners: owners_or_default(row.owners),
            growth_rate: row.growth_rate.unwrap_or(IMPORT_GROWTH_RATE),
            start_age: None,
            end_age: None,
            is_undeclared: false,
        });
    }

    let first_expense_id = next_id(backup.expenses.iter().map(|expense| expense.id.as_str()));
    for (offset, row) in import.expenses.into_iter().enumerate() {
        backup.expenses.push(Expense {
            id: (first_expense_id + offset as u64).to_string(),
            name: row.name.unwrap_or_else(|| "Imported Expense".to_string()),
            amount: row.amount.unwrap_or(0.0),
            growth_rate: row.growth_rate.unwrap_or(IMPORT_GROWTH_RATE),
            start_year: None,
            end_year: None,
            is_mortgage: false,
        });
    }

    info!(
        assets = summary.assets,
        incomes = summary.incomes,
        expenses = summary.expenses,
        "merged partial import"
    );
    Ok(summary)
}

fn next_id<'a>(ids: impl Iterator<Item = &'a str>) -> u64 {
    ids.filter_map(|id| id.trim().parse::<u64>().ok())
        .max()
        .unwrap_or(0)
        + 1
}

fn asset_type_from_label(label: &str) -> AssetType {
    match label.trim().to_ascii_lowercase().as_str() {
        "real_estate" => AssetType::RealEstate,
        "stock" => AssetType::Stock,
        "fund" => AssetType::Fund,
        "pension_plan" => AssetType::PensionPlan,
        "cash" => AssetType::Cash,
        "other" | "business" => AssetType::Other,
        unknown => {
            warn!(label = unknown, "unknown asset type, importing as other");
            AssetType::Other
        }
    }
}

fn income_type_from_label(label: &str) -> IncomeType {
    match label.trim().to_ascii_lowercase().as_str() {
        "salary" => IncomeType::Salary,
        "rental" => IncomeType::Rental,
        "dividend" => IncomeType::Dividend,
        "interest" => IncomeType::Interest,
        "pension" => IncomeType::Pension,
        "other" => IncomeType::Other,
        unknown => {
            warn!(label = unknown, "unknown income type, importing as other");
            IncomeType::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKUP_JSON: &str = r#"{
      "version": 1,
      "members": [
        { "id": "1", "name": "Parent 1", "age": 40, "isEarner": true },
        { "id": "2", "name": "Parent 2", "age": 38, "isEarner": true,
          "hasBis56Exemption": true, "bis56ExemptionYearsRemaining": 4 }
      ],
      "assets": [
        { "id": "1", "name": "Main Home", "type": "real_estate", "value": 400000,
          "owners": ["1", "2"], "purchaseValue": 300000, "isMainResidence": true,
          "growthRate": 0.02, "valorCatastral": 150000 },
        { "id": "7", "name": "Broker", "type": "business", "value": 1000, "owners": ["1"],
          "purchaseValue": 0, "isMainResidence": false, "isForeignAsset": true }
      ],
      "incomes": [
        { "id": "1", "name": "Salary 1", "type": "salary", "amount": 45000,
          "owners": ["1"], "growthRate": 0.02, "endAge": 65 }
      ],
      "expenses": [
        { "id": "1", "name": "Living Expenses", "amount": 30000, "growthRate": 0.02 },
        { "id": "2", "name": "Mortgage", "amount": 9000, "growthRate": 0,
          "endYear": 12, "isMortgage": true }
      ],
      "settings": { "targetRetirementIncome": 35000 },
      "timestamp": "2024-05-01T10:00:00.000Z"
    }"#;

    #[test]
    fn parses_backup_with_web_keys() {
        let backup = BackupDocument::from_json(BACKUP_JSON).expect("backup should parse");

        assert_eq!(backup.version, 1);
        assert_eq!(backup.members.len(), 2);
        assert!(backup.members[1].has_impatriate_regime);
        assert_eq!(backup.members[1].impatriate_years_remaining, Some(4));
        assert_eq!(backup.assets[0].asset_type, AssetType::RealEstate);
        assert_eq!(backup.assets[0].cadastral_value, Some(150_000.0));
        assert_eq!(backup.assets[1].asset_type, AssetType::Other);
        assert!(backup.assets[1].is_foreign_asset);
        assert_eq!(backup.incomes[0].end_age, Some(65));
        assert!(backup.expenses[1].is_mortgage);
        assert_eq!(backup.settings.target_retirement_income, 35_000.0);
    }

    #[test]
    fn rejects_backup_without_version_or_members() {
        for json in [
            r#"{ "members": [] }"#,
            r#"{ "version": 0, "members": [] }"#,
            r#"{ "version": 1, "assets": [] }"#,
        ] {
            let err = BackupDocument::from_json(json).expect_err("must reject");
            assert!(
                err.to_string().contains("Invalid backup file format"),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn minimal_backup_defaults_optional_sections() {
        let backup = BackupDocument::from_json(
            r#"{ "version": 1, "members": [{ "id": "1", "age": 30, "isEarner": true }] }"#,
        )
        .expect("minimal backup parses");

        assert!(backup.assets.is_empty());
        assert!(backup.expenses.is_empty());
        assert_eq!(backup.settings.target_retirement_income, 0.0);
        assert_eq!(backup.members[0].name, "");
    }

    #[test]
    fn save_then_load_preserves_document() {
        let backup = BackupDocument::from_json(BACKUP_JSON).expect("backup should parse");
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("backup.json");

        backup.save(&path).expect("save backup");
        let restored = BackupDocument::load(&path).expect("load backup");

        assert_eq!(restored, backup);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = BackupDocument::load(&dir.path().join("missing.json")).expect_err("no file");
        assert!(matches!(err, PlannerError::Io(_)));
    }

    #[test]
    fn merge_defaults_partial_rows() {
        let mut backup = BackupDocument::from_json(BACKUP_JSON).expect("backup should parse");
        let import = PartialImport {
            assets: vec![
                PartialAsset {
                    name: Some("Brokerage".to_string()),
                    asset_type: Some("stock".to_string()),
                    value: Some(25_000.0),
                    ..PartialAsset::default()
                },
                PartialAsset {
                    asset_type: Some("yacht".to_string()),
                    value: Some(80_000.0),
                    owners: Some(vec!["2".to_string()]),
                    ..PartialAsset::default()
                },
            ],
            incomes: vec![PartialIncome {
                name: Some("Rent".to_string()),
                income_type: Some("rental".to_string()),
                amount: Some(9_600.0),
                ..PartialIncome::default()
            }],
            expenses: vec![PartialExpense {
                amount: Some(1_200.0),
                ..PartialExpense::default()
            }],
        };

        let summary = merge_partial_import(&mut backup, import).expect("merge succeeds");

        assert_eq!(
            summary,
            ImportSummary {
                assets: 2,
                incomes: 1,
                expenses: 1
            }
        );
        let brokerage = &backup.assets[2];
        assert_eq!(brokerage.id, "8");
        assert_eq!(brokerage.owners, vec!["1".to_string()]);
        assert_eq!(brokerage.purchase_value, 25_000.0);
        assert_eq!(brokerage.growth_rate, Some(0.05));
        let yacht = &backup.assets[3];
        assert_eq!(yacht.id, "9");
        assert_eq!(yacht.name, "Imported Asset");
        assert_eq!(yacht.asset_type, AssetType::Other);
        assert_eq!(yacht.owners, vec!["2".to_string()]);
        assert_eq!(yacht.growth_rate, Some(0.02));

        let rent = &backup.incomes[1];
        assert_eq!(rent.id, "2");
        assert_eq!(rent.income_type, IncomeType::Rental);
        assert_eq!(rent.growth_rate, 0.02);

        let expense = &backup.expenses[2];
        assert_eq!(expense.id, "3");
        assert_eq!(expense.name, "Imported Expense");
        assert_eq!(expense.growth_rate, 0.02);
    }

    #[test]
    fn merge_requires_a_family_member() {
        let mut backup = BackupDocument::from_json(r#"{ "version": 1, "members": [] }"#)
            .expect("empty household is a valid document");

        let err = merge_partial_import(&mut backup, PartialImport::default())
            .expect_err("must refuse");
        assert!(matches!(err, PlannerError::InvalidInput(_)));
    }

    #[test]
    fn backup_projection_runs_on_its_own_collections() {
        let backup = BackupDocument::from_json(BACKUP_JSON).expect("backup should parse");
        let params = ProjectionParams {
            start_year: 2024,
            years_to_project: 3,
            inflation_rate: 0.02,
            target_retirement_income: backup.settings.target_retirement_income,
            do_joint_taxes: false,
        };

        let result = backup.project(&params);

        assert_eq!(result.years.len(), 3);
        assert_eq!(result.years[0].year, 2024);
        assert_eq!(backup.assets[0].value, 400_000.0);
    }
}
