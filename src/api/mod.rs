use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    CgtResult, IncomeTaxResult, MigrationError, Profile, ReadinessSummary, Scenario,
    ScenarioResult, SimulationError, TaxConfig, calculate_cgt, calculate_income_tax,
    calculate_retirement_readiness, load_profile, load_scenario, load_scenarios,
    profile_from_value, run_all_scenarios, run_scenario, scenario_from_value,
};

#[derive(Debug, Parser)]
#[command(
    name = "retirement-sim",
    about = "Deterministic retirement scenario simulator (South-African tax rules)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, env = "RETIREMENT_SIM_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Run one scenario document against a profile document.
    Run {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        profile: PathBuf,
        #[arg(long, help = "Pretty-print the JSON output")]
        pretty: bool,
    },
    /// Run every scenario in a JSON array against one profile.
    RunAll {
        #[arg(long)]
        scenarios: PathBuf,
        #[arg(long)]
        profile: PathBuf,
        #[arg(long, help = "Pretty-print the JSON output")]
        pretty: bool,
    },
    /// Phase-based readiness check for a profile.
    Readiness {
        #[arg(long)]
        profile: PathBuf,
        #[arg(long, help = "Pretty-print the JSON output")]
        pretty: bool,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Load(#[from] MigrationError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    scenario: Value,
    #[serde(default)]
    profile: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RunAllPayload {
    scenarios: Vec<Value>,
    #[serde(default)]
    profile: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ReadinessPayload {
    profile: Value,
}

#[derive(Debug, Deserialize)]
struct IncomeTaxQuery {
    income: f64,
    age: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CgtQuery {
    gain: f64,
    age: u32,
    #[serde(default)]
    other_income: f64,
}

/// The scenario comes back with `results` and `lastRun` attached.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    scenario: Scenario,
    result: ScenarioResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunAllResponse {
    runs: Vec<RunResponse>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_cli(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await?,
        Command::Run {
            scenario,
            profile,
            pretty,
        } => {
            let scenario = load_scenario(&read_document(&scenario)?)?;
            let profile = load_profile(&read_document(&profile)?)?;
            let response = execute_run(scenario, Some(&profile), Utc::now());
            print_json(&response, pretty)?;
        }
        Command::RunAll {
            scenarios,
            profile,
            pretty,
        } => {
            let scenarios = load_scenarios(&read_document(&scenarios)?)?;
            let profile = load_profile(&read_document(&profile)?)?;
            let response = execute_run_all(scenarios, Some(&profile), Utc::now());
            print_json(&response, pretty)?;
        }
        Command::Readiness { profile, pretty } => {
            let profile = load_profile(&read_document(&profile)?)?;
            print_json(&calculate_retirement_readiness(&profile)?, pretty)?;
        }
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/api/scenarios/run", post(run_handler))
        .route("/api/scenarios/run-all", post(run_all_handler))
        .route("/api/readiness", post(readiness_handler))
        .route("/api/tax/income", get(income_tax_handler))
        .route("/api/tax/cgt", get(cgt_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "retirement-sim API listening");

    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn run_handler(Json(payload): Json<RunPayload>) -> Response {
    match run_request(payload, Utc::now()) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn run_all_handler(Json(payload): Json<RunAllPayload>) -> Response {
    match run_all_request(payload, Utc::now()) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn readiness_handler(Json(payload): Json<ReadinessPayload>) -> Response {
    match readiness_request(payload) {
        Ok(summary) => json_response(StatusCode::OK, summary),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn income_tax_handler(Query(query): Query<IncomeTaxQuery>) -> Response {
    match income_tax_request(&query) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn cgt_handler(Query(query): Query<CgtQuery>) -> Response {
    match cgt_request(&query) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
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

fn execute_run(mut scenario: Scenario, profile: Option<&Profile>, ran_at: DateTime<Utc>) -> RunResponse {
    let result = run_scenario(&scenario, profile);
    scenario.record_run(result.clone(), ran_at);
    RunResponse { scenario, result }
}

fn execute_run_all(
    scenarios: Vec<Scenario>,
    profile: Option<&Profile>,
    ran_at: DateTime<Utc>,
) -> RunAllResponse {
    let results = run_all_scenarios(&scenarios, profile);
    let runs = scenarios
        .into_iter()
        .zip(results)
        .map(|(mut scenario, result)| {
            scenario.record_run(result.clone(), ran_at);
            RunResponse { scenario, result }
        })
        .collect();
    RunAllResponse { runs }
}

fn run_request(payload: RunPayload, ran_at: DateTime<Utc>) -> Result<RunResponse, MigrationError> {
    let scenario = scenario_from_value(payload.scenario)?;
    let profile = payload.profile.map(profile_from_value).transpose()?;
    Ok(execute_run(scenario, profile.as_ref(), ran_at))
}

fn run_all_request(
    payload: RunAllPayload,
    ran_at: DateTime<Utc>,
) -> Result<RunAllResponse, MigrationError> {
    let scenarios = payload
        .scenarios
        .into_iter()
        .map(scenario_from_value)
        .collect::<Result<Vec<_>, _>>()?;
    let profile = payload.profile.map(profile_from_value).transpose()?;
    Ok(execute_run_all(scenarios, profile.as_ref(), ran_at))
}

fn readiness_request(payload: ReadinessPayload) -> Result<ReadinessSummary, String> {
    let profile = profile_from_value(payload.profile).map_err(|e| e.to_string())?;
    calculate_retirement_readiness(&profile).map_err(|e| e.to_string())
}

fn income_tax_request(query: &IncomeTaxQuery) -> Result<IncomeTaxResult, String> {
    if !query.income.is_finite() || query.income < 0.0 {
        return Err("income must be a non-negative number".to_string());
    }
    Ok(calculate_income_tax(
        query.income,
        query.age,
        &TaxConfig::default(),
    ))
}

fn cgt_request(query: &CgtQuery) -> Result<CgtResult, String> {
    if !query.gain.is_finite() || !query.other_income.is_finite() || query.other_income < 0.0 {
        return Err("gain and otherIncome must be finite; otherIncome non-negative".to_string());
    }
    Ok(calculate_cgt(
        query.gain,
        query.age,
        &TaxConfig::default(),
        query.other_income,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ran_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn profile_json() -> Value {
        json!({
            "schemaVersion": 2,
            "assets": [{
                "name": "global tracker",
                "assetClass": "Offshore Equity",
                "currency": "USD",
                "assetType": "Investible",
                "accountType": "TFSA",
                "units": 1000,
                "currentPrice": 100,
                "costPrice": 60
            }, {
                "name": "house",
                "assetClass": "Property",
                "currency": "ZAR",
                "assetType": "Non-Investible",
                "accountType": "Taxable",
                "units": 1,
                "currentPrice": 3000000
            }],
            "incomeSources": [{
                "name": "state pension",
                "monthlyAmount": 2000,
                "currency": "ZAR",
                "startAge": 65,
                "isTaxable": true,
                "isInflationAdjusted": true,
                "type": "Pension"
            }],
            "expenseCategories": [{ "name": "living", "monthlyAmount": 8000 }],
            "settings": {
                "currentAge": 60,
                "reportingCurrency": "ZAR",
                "exchangeRates": { "base": "ZAR", "rates": { "USD": 18.0 } }
            }
        })
    }

    fn scenario_json(name: &str, retirement_age: u32) -> Value {
        json!({
            "schemaVersion": 2,
            "name": name,
            "inflationRate": 5.0,
            "retirementAge": retirement_age,
            "lifeExpectancy": 90,
            "expenses": { "kind": "modules" }
        })
    }

    #[test]
    fn run_request_attaches_results_and_timestamp() {
        let payload = RunPayload {
            scenario: scenario_json("base", 65),
            profile: Some(profile_json()),
        };
        let response = run_request(payload, ran_at()).expect("valid request");

        assert!(response.result.error.is_none());
        assert_eq!(response.result.trajectory.len(), 31);
        assert_eq!(response.result.metrics.initial_portfolio_value, 1_800_000.0);
        assert_eq!(response.scenario.last_run, Some(ran_at()));
        assert_eq!(response.scenario.results.as_ref(), Some(&response.result));

        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"lastRun\""));
        assert!(json.contains("\"expenseCoverageBreakdown\""));
        assert!(json.contains("\"depletionAge\""));
    }

    #[test]
    fn run_request_without_profile_reports_error_in_result() {
        let payload = RunPayload {
            scenario: scenario_json("orphan", 65),
            profile: None,
        };
        let response = run_request(payload, ran_at()).expect("scenario itself is valid");
        assert!(response.result.trajectory.is_empty());
        assert!(
            response
                .result
                .error
                .as_deref()
                .is_some_and(|e| e.contains("profile"))
        );
    }

    #[test]
    fn run_request_rejects_unsupported_versions() {
        let mut scenario = scenario_json("future", 65);
        scenario["schemaVersion"] = json!(7);
        let payload = RunPayload {
            scenario,
            profile: Some(profile_json()),
        };
        let err = run_request(payload, ran_at()).expect_err("must reject future schema");
        assert!(err.to_string().contains("schema version 7"));
    }

    #[test]
    fn run_all_request_keeps_input_order() {
        let payload = RunAllPayload {
            scenarios: vec![scenario_json("early", 55), scenario_json("late", 70)],
            profile: Some(profile_json()),
        };
        let response = run_all_request(payload, ran_at()).expect("valid request");
        let names: Vec<_> = response.runs.iter().map(|r| r.scenario.name.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);
        assert!(response.runs.iter().all(|r| r.scenario.last_run.is_some()));
    }

    #[test]
    fn readiness_request_needs_settings() {
        let err = readiness_request(ReadinessPayload {
            profile: json!({ "schemaVersion": 2 }),
        })
        .expect_err("settings are required");
        assert!(err.contains("settings"));

        let summary = readiness_request(ReadinessPayload {
            profile: profile_json(),
        })
        .expect("valid profile");
        assert_eq!(summary.current_portfolio_value, 1_800_000.0);
    }

    #[test]
    fn income_tax_request_uses_default_table() {
        let result = income_tax_request(&IncomeTaxQuery {
            income: 237_100.0,
            age: 40,
        })
        .expect("valid query");
        assert!((result.gross_tax - 42_678.0).abs() < 1e-6);
        assert!(
            income_tax_request(&IncomeTaxQuery {
                income: -1.0,
                age: 40
            })
            .is_err()
        );
    }

    #[test]
    fn cgt_request_validates_inputs() {
        let result = cgt_request(&CgtQuery {
            gain: 100_000.0,
            age: 50,
            other_income: 500_000.0,
        })
        .expect("valid query");
        assert!((result.cgt_payable - 8_640.0).abs() < 1e-6);
        assert!(
            cgt_request(&CgtQuery {
                gain: f64::NAN,
                age: 50,
                other_income: 0.0
            })
            .is_err()
        );
    }

    #[test]
    fn responses_are_never_cached() {
        let response = error_response(StatusCode::BAD_REQUEST, "bad");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "retirement-sim",
            "run",
            "--scenario",
            "scenario.json",
            "--profile",
            "profile.json",
            "--pretty",
        ])
        .expect("valid arguments");
        match cli.command {
            Command::Run {
                scenario,
                profile,
                pretty,
            } => {
                assert_eq!(scenario, PathBuf::from("scenario.json"));
                assert_eq!(profile, PathBuf::from("profile.json"));
                assert!(pretty);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["retirement-sim", "serve", "--port", "9001"])
            .expect("valid arguments");
        assert!(matches!(cli.command, Command::Serve { port: 9001 }));
        assert!(Cli::try_parse_from(["retirement-sim", "run-all", "--profile", "p.json"]).is_err());
    }
}
