use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::backup::{BackupDocument, ImportSummary, PartialImport, merge_partial_import};
use crate::core::{
    Asset, Expense, FamilyMember, IncomeStream, ProjectionParams, SimulationResult, fiscal_tables,
    run_projection,
};
use crate::error::{PlannerError, Result};

pub const MAX_PROJECTION_YEARS: u32 = 100;

const DEFAULT_START_YEAR: i32 = 2024;
const DEFAULT_YEARS: u32 = 40;
const DEFAULT_INFLATION_RATE: f64 = 0.02;

#[derive(Parser, Debug)]
#[command(
    name = "gipuzkoa-planner",
    about = "Household net worth, income and tax projection under Gipuzkoa fiscal rules"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Log per-year projection details")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Project a backup file and print the yearly results as JSON.
    Project(ProjectArgs),
    /// Merge a partial import file into a backup file.
    Import {
        #[arg(long)]
        backup: PathBuf,
        #[arg(long)]
        partial: PathBuf,
        #[arg(long, help = "Where to write the merged backup; defaults to --backup")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[arg(long)]
    backup: PathBuf,
    #[arg(long, default_value_t = DEFAULT_START_YEAR)]
    start_year: i32,
    #[arg(long, default_value_t = DEFAULT_YEARS)]
    years: u32,
    #[arg(
        long,
        default_value_t = DEFAULT_INFLATION_RATE * 100.0,
        help = "Annual inflation, in percent"
    )]
    inflation_rate: f64,
    #[arg(
        long,
        help = "Net retirement income target; defaults to the backup settings"
    )]
    target_income: Option<f64>,
    #[arg(long, help = "Tax earners jointly")]
    joint_taxes: bool,
    #[arg(long, help = "Pretty-print the JSON output")]
    pretty: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await,
        Command::Project(args) => {
            let backup = BackupDocument::load(&args.backup)?;
            let params = build_params(&args, backup.settings.target_retirement_income)?;
            validate_projection(
                &backup.members,
                &backup.assets,
                &backup.incomes,
                &backup.expenses,
                &params,
            )?;
            let result = backup.project(&params);
            let json = if args.pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");
            Ok(())
        }
        Command::Import {
            backup,
            partial,
            output,
        } => {
            let mut document = BackupDocument::load(&backup)?;
            let import: PartialImport =
                serde_json::from_str(&std::fs::read_to_string(&partial)?)?;
            let summary = merge_partial_import(&mut document, import)?;
            let target = output.unwrap_or(backup);
            document.save(&target)?;
            println!(
                "Imported {} assets, {} incomes and {} expenses into {}",
                summary.assets,
                summary.incomes,
                summary.expenses,
                target.display()
            );
            Ok(())
        }
    }
}

fn build_params(args: &ProjectArgs, settings_target: f64) -> Result<ProjectionParams> {
    if !(1..=MAX_PROJECTION_YEARS).contains(&args.years) {
        return Err(invalid(format!(
            "--years must be between 1 and {MAX_PROJECTION_YEARS}"
        )));
    }
    if !args.inflation_rate.is_finite() || args.inflation_rate <= -100.0 {
        return Err(invalid("--inflation-rate must be a finite percentage above -100"));
    }
    let target = args.target_income.unwrap_or(settings_target);
    if !target.is_finite() || target < 0.0 {
        return Err(invalid("--target-income must be >= 0"));
    }

    Ok(ProjectionParams {
        start_year: args.start_year,
        years_to_project: args.years,
        inflation_rate: args.inflation_rate / 100.0,
        target_retirement_income: target,
        do_joint_taxes: args.joint_taxes,
    })
}

/// Rejects inputs the engine would turn into NaN or meaningless output.
pub fn validate_projection(
    members: &[FamilyMember],
    assets: &[Asset],
    incomes: &[IncomeStream],
    expenses: &[Expense],
    params: &ProjectionParams,
) -> Result<()> {
    if members.is_empty() {
        return Err(invalid("at least one family member is required"));
    }
    let mut seen = HashSet::new();
    for member in members {
        if !seen.insert(member.id.as_str()) {
            return Err(invalid(format!("duplicate family member id '{}'", member.id)));
        }
    }

    if !(1..=MAX_PROJECTION_YEARS).contains(&params.years_to_project) {
        return Err(invalid(format!(
            "yearsToProject must be between 1 and {MAX_PROJECTION_YEARS}"
        )));
    }
    if !params.inflation_rate.is_finite() {
        return Err(invalid("inflationRate must be finite"));
    }
    if !params.target_retirement_income.is_finite() || params.target_retirement_income < 0.0 {
        return Err(invalid("targetRetirementIncome must be >= 0"));
    }

    for asset in assets {
        if !asset.value.is_finite() || !asset.purchase_value.is_finite() {
            return Err(invalid(format!("asset '{}' has a non-finite value", asset.id)));
        }
        if !valid_growth(asset.effective_growth_rate()) {
            return Err(invalid(format!(
                "asset '{}' growth rate must be finite and above -100%",
                asset.id
            )));
        }
        warn_unknown_owners("asset", &asset.id, &asset.owners, &seen);
    }
    for income in incomes {
        if !income.amount.is_finite() {
            return Err(invalid(format!("income '{}' has a non-finite amount", income.id)));
        }
        if !valid_growth(income.growth_rate) {
            return Err(invalid(format!(
                "income '{}' growth rate must be finite and above -100%",
                income.id
            )));
        }
        warn_unknown_owners("income", &income.id, &income.owners, &seen);
    }
    for expense in expenses {
        if !expense.amount.is_finite() {
            return Err(invalid(format!(
                "expense '{}' has a non-finite amount",
                expense.id
            )));
        }
        if !valid_growth(expense.growth_rate) {
            return Err(invalid(format!(
                "expense '{}' growth rate must be finite and above -100%",
                expense.id
            )));
        }
        if matches!(
            (expense.start_year, expense.end_year),
            (Some(start), Some(end)) if end < start
        ) {
            return Err(invalid(format!(
                "expense '{}' endYear must not precede startYear",
                expense.id
            )));
        }
    }
    Ok(())
}

fn valid_growth(rate: f64) -> bool {
    rate.is_finite() && rate > -1.0
}

fn warn_unknown_owners(kind: &str, id: &str, owners: &[String], members: &HashSet<&str>) {
    for owner in owners {
        if !members.contains(owner.as_str()) {
            warn!(kind, id, owner = owner.as_str(), "owner is not a family member");
        }
    }
}

fn invalid(msg: impl Into<String>) -> PlannerError {
    PlannerError::InvalidInput(msg.into())
}

/// Optional projection settings accepted next to the household data.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ParamsOverlay {
    start_year: Option<i32>,
    years_to_project: Option<u32>,
    inflation_rate: Option<f64>,
    target_retirement_income: Option<f64>,
    do_joint_taxes: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    members: Vec<FamilyMember>,
    assets: Vec<Asset>,
    incomes: Vec<IncomeStream>,
    expenses: Vec<Expense>,
    #[serde(flatten)]
    params: ParamsOverlay,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupProjectPayload {
    backup: serde_json::Value,
    #[serde(flatten)]
    params: ParamsOverlay,
}

#[derive(Debug, Deserialize)]
struct BackupImportPayload {
    backup: serde_json::Value,
    #[serde(default)]
    import: PartialImport,
}

#[derive(Debug, Serialize)]
struct BackupImportResponse {
    backup: BackupDocument,
    summary: ImportSummary,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn default_params_for_api() -> ProjectionParams {
    ProjectionParams {
        start_year: DEFAULT_START_YEAR,
        years_to_project: DEFAULT_YEARS,
        inflation_rate: DEFAULT_INFLATION_RATE,
        target_retirement_income: 0.0,
        do_joint_taxes: false,
    }
}

fn params_from_overlay(overlay: ParamsOverlay, base: ProjectionParams) -> ProjectionParams {
    let mut params = base;
    if let Some(v) = overlay.start_year {
        params.start_year = v;
    }
    if let Some(v) = overlay.years_to_project {
        params.years_to_project = v;
    }
    if let Some(v) = overlay.inflation_rate {
        params.inflation_rate = v;
    }
    if let Some(v) = overlay.target_retirement_income {
        params.target_retirement_income = v;
    }
    if let Some(v) = overlay.do_joint_taxes {
        params.do_joint_taxes = v;
    }
    params
}

fn project_from_payload(payload: ProjectPayload) -> Result<SimulationResult> {
    let params = params_from_overlay(payload.params, default_params_for_api());
    validate_projection(
        &payload.members,
        &payload.assets,
        &payload.incomes,
        &payload.expenses,
        &params,
    )?;
    Ok(run_projection(
        &payload.members,
        &payload.assets,
        &payload.incomes,
        &payload.expenses,
        &params,
    ))
}

fn project_backup_from_payload(payload: BackupProjectPayload) -> Result<SimulationResult> {
    let backup = BackupDocument::from_value(payload.backup)?;
    let mut base = default_params_for_api();
    base.target_retirement_income = backup.settings.target_retirement_income;
    let params = params_from_overlay(payload.params, base);
    validate_projection(
        &backup.members,
        &backup.assets,
        &backup.incomes,
        &backup.expenses,
        &params,
    )?;
    Ok(backup.project(&params))
}

fn import_from_payload(payload: BackupImportPayload) -> Result<BackupImportResponse> {
    let mut backup = BackupDocument::from_value(payload.backup)?;
    let summary = merge_partial_import(&mut backup, payload.import)?;
    Ok(BackupImportResponse { backup, summary })
}

pub async fn run_http_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "planner HTTP API listening");

    axum::serve(listener, app).await?;
    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/fiscal", get(fiscal_handler))
        .route("/api/project", post(project_handler))
        .route("/api/backup/project", post(backup_project_handler))
        .route("/api/backup/import", post(backup_import_handler))
        .fallback(not_found_handler)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn fiscal_handler() -> Response {
    json_response(StatusCode::OK, fiscal_tables())
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_handler(Json(payload): Json<ProjectPayload>) -> Response {
    result_response(project_from_payload(payload))
}

async fn backup_project_handler(Json(payload): Json<BackupProjectPayload>) -> Response {
    result_response(project_backup_from_payload(payload))
}

async fn backup_import_handler(Json(payload): Json<BackupImportPayload>) -> Response {
    result_response(import_from_payload(payload))
}

fn result_response<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => {
            warn!(error = %err, "rejected request");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
