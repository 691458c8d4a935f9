use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::bridge::{BridgeError, ExecutionBridge, ProgressFn};
use crate::core::{
    AggregatedResult, NetWorthBand, SimulationConfig, net_worth_bands, yearly_offsets,
};

#[derive(Parser, Debug)]
#[command(
    name = "runway",
    about = "Monte Carlo wealth-runway simulator (liquid buffer + taxable investments + emergencies)"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level used when RUST_LOG is not set"
    )]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API over HTTP.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one simulation and print the aggregate as JSON.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SimulateArgs {
    #[arg(long)]
    liquid_balance: f64,
    #[arg(long, default_value_t = 0.0)]
    invested_balance: f64,
    #[arg(
        long,
        help = "Cost basis of the invested balance; defaults to invested-balance"
    )]
    invested_cost_basis: Option<f64>,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Non-growing assets counted in net worth only"
    )]
    other_assets: f64,
    #[arg(long, default_value_t = 0.0)]
    monthly_income: f64,
    #[arg(long)]
    monthly_expenses: f64,
    #[arg(
        long,
        default_value_t = 7.0,
        help = "Expected annual investment return in percent"
    )]
    annual_return: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Annual return volatility in percent"
    )]
    annual_volatility: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Monthly expense volatility in percent"
    )]
    expense_volatility: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Monthly income volatility in percent"
    )]
    income_volatility: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Chance of an emergency expense in any month, in percent"
    )]
    emergency_probability: f64,
    #[arg(long, default_value_t = 2_000.0)]
    emergency_mean_cost: f64,
    #[arg(long, default_value_t = 1_000.0)]
    emergency_std_dev: f64,
    #[arg(long, default_value_t = 1_000)]
    simulations: u32,
    #[arg(long, default_value_t = 360)]
    horizon_months: u32,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Expected annual inflation in percent"
    )]
    inflation_rate: f64,
    #[arg(
        long,
        default_value_t = 100.0,
        help = "Share of the invested balance held in taxable accounts, in percent"
    )]
    taxable_fraction: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Capital gains tax rate on realised gains in percent"
    )]
    capital_gains_tax_rate: f64,
    #[arg(
        long,
        default_value_t = 6.0,
        help = "Months of expenses kept liquid before surplus is invested"
    )]
    buffer_months: f64,
    #[arg(long, help = "Base seed for a reproducible run")]
    seed: Option<u64>,
    #[arg(long, help = "Include every trial's monthly series in the output")]
    include_trials: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatePayload {
    liquid_balance: Option<f64>,
    invested_balance: Option<f64>,
    invested_cost_basis: Option<f64>,
    other_assets: Option<f64>,
    monthly_income: Option<f64>,
    monthly_expenses: Option<f64>,

    annual_return: Option<f64>,
    annual_volatility: Option<f64>,
    expense_volatility: Option<f64>,
    income_volatility: Option<f64>,

    emergency_probability: Option<f64>,
    emergency_mean_cost: Option<f64>,
    emergency_std_dev: Option<f64>,

    simulations: Option<u32>,
    horizon_months: Option<u32>,
    inflation_rate: Option<f64>,
    taxable_fraction: Option<f64>,
    capital_gains_tax_rate: Option<f64>,
    buffer_months: Option<f64>,
    seed: Option<u64>,
    include_trials: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    #[serde(flatten)]
    result: AggregatedResult,
    net_worth_bands: Vec<NetWorthBand>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    background_execution: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Serve { port } => run_http_server(port)
            .await
            .map_err(|e| format!("server error: {e}")),
        Command::Simulate(args) => run_simulate(args).await,
    }
}

async fn run_simulate(args: SimulateArgs) -> Result<(), String> {
    let config = build_config(&args)?;
    let bridge = ExecutionBridge::new();
    let on_progress: ProgressFn = Arc::new(|progress: f64| {
        info!(percent = (progress * 100.0).round(), "simulating");
    });

    let result = bridge
        .run_simulation(config, Some(on_progress))
        .await
        .map_err(|e| e.to_string())?;
    let response = build_simulate_response(result, args.include_trials);
    let json = serde_json::to_string_pretty(&response)
        .map_err(|e| format!("failed to encode result: {e}"))?;
    println!("{json}");
    Ok(())
}

fn build_config(args: &SimulateArgs) -> Result<SimulationConfig, String> {
    if args.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if args.horizon_months == 0 {
        return Err("--horizon-months must be > 0".to_string());
    }

    if !args.annual_return.is_finite() || args.annual_return <= -100.0 {
        return Err("--annual-return must be > -100".to_string());
    }

    if !args.inflation_rate.is_finite() || args.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    let config = SimulationConfig {
        liquid_balance: args.liquid_balance,
        invested_balance: args.invested_balance,
        invested_cost_basis: args.invested_cost_basis,
        other_assets: args.other_assets,
        monthly_income: args.monthly_income,
        monthly_expenses: args.monthly_expenses,
        annual_return: args.annual_return / 100.0,
        annual_volatility: unit_percent("--annual-volatility", args.annual_volatility)?,
        expense_volatility: unit_percent("--expense-volatility", args.expense_volatility)?,
        income_volatility: unit_percent("--income-volatility", args.income_volatility)?,
        emergency_probability_monthly: unit_percent(
            "--emergency-probability",
            args.emergency_probability,
        )?,
        emergency_mean_cost: args.emergency_mean_cost,
        emergency_std_dev: args.emergency_std_dev,
        num_simulations: args.simulations,
        time_horizon_months: args.horizon_months,
        inflation_rate: args.inflation_rate / 100.0,
        taxable_fraction: unit_percent("--taxable-fraction", args.taxable_fraction)?,
        capital_gains_tax_rate: unit_percent(
            "--capital-gains-tax-rate",
            args.capital_gains_tax_rate,
        )?,
        buffer_months: args.buffer_months,
        seed: args.seed,
    };
    config
        .validate()
        .map_err(|e| format!("invalid configuration: {e}"))?;
    Ok(config)
}

fn unit_percent(flag: &str, value: f64) -> Result<f64, String> {
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{flag} must be between 0 and 100"));
    }
    Ok(value / 100.0)
}

fn build_simulate_response(
    mut result: AggregatedResult,
    include_trials: bool,
) -> SimulateResponse {
    let bands = net_worth_bands(&result.trials, &yearly_offsets(result.time_horizon_months));
    if !include_trials {
        result.trials = Vec::new();
    }
    SimulateResponse {
        result,
        net_worth_bands: bands,
    }
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let bridge = Arc::new(ExecutionBridge::new());
    if !bridge.is_background_execution_supported() {
        warn!("simulations will be rejected until the execution context is available");
    }

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "runway HTTP API listening");
    axum::serve(listener, router(bridge)).await
}

fn router(bridge: Arc<ExecutionBridge>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .fallback(not_found_handler)
        .with_state(bridge)
}

async fn health_handler(State(bridge): State<Arc<ExecutionBridge>>) -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            background_execution: bridge.is_background_execution_supported(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(
    State(bridge): State<Arc<ExecutionBridge>>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    let args = args_from_payload(payload);
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match bridge.run_simulation(config, None).await {
        Ok(result) => json_response(
            StatusCode::OK,
            build_simulate_response(result, args.include_trials),
        ),
        Err(err) => {
            warn!(error = %err, "simulation request failed");
            error_response(status_for(&err), &err.to_string())
        }
    }
}

fn status_for(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        BridgeError::Unsupported(_) | BridgeError::Terminated => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Simulation(_) => StatusCode::INTERNAL_SERVER_ERROR,
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

#[cfg(test)]
fn args_from_json(json: &str) -> Result<SimulateArgs, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(args_from_payload(payload))
}

fn args_from_payload(payload: SimulatePayload) -> SimulateArgs {
    let mut args = default_args_for_api();

    if let Some(v) = payload.liquid_balance {
        args.liquid_balance = v;
    }
    if let Some(v) = payload.invested_balance {
        args.invested_balance = v;
    }
    if let Some(v) = payload.invested_cost_basis {
        args.invested_cost_basis = Some(v);
    }
    if let Some(v) = payload.other_assets {
        args.other_assets = v;
    }
    if let Some(v) = payload.monthly_income {
        args.monthly_income = v;
    }
    if let Some(v) = payload.monthly_expenses {
        args.monthly_expenses = v;
    }
    if let Some(v) = payload.annual_return {
        args.annual_return = v;
    }
    if let Some(v) = payload.annual_volatility {
        args.annual_volatility = v;
    }
    if let Some(v) = payload.expense_volatility {
        args.expense_volatility = v;
    }
    if let Some(v) = payload.income_volatility {
        args.income_volatility = v;
    }
    if let Some(v) = payload.emergency_probability {
        args.emergency_probability = v;
    }
    if let Some(v) = payload.emergency_mean_cost {
        args.emergency_mean_cost = v;
    }
    if let Some(v) = payload.emergency_std_dev {
        args.emergency_std_dev = v;
    }
    if let Some(v) = payload.simulations {
        args.simulations = v;
    }
    if let Some(v) = payload.horizon_months {
        args.horizon_months = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.taxable_fraction {
        args.taxable_fraction = v;
    }
    if let Some(v) = payload.capital_gains_tax_rate {
        args.capital_gains_tax_rate = v;
    }
    if let Some(v) = payload.buffer_months {
        args.buffer_months = v;
    }
    if let Some(v) = payload.seed {
        args.seed = Some(v);
    }
    if let Some(v) = payload.include_trials {
        args.include_trials = v;
    }

    args
}

fn default_args_for_api() -> SimulateArgs {
    SimulateArgs {
        liquid_balance: 20_000.0,
        invested_balance: 50_000.0,
        invested_cost_basis: None,
        other_assets: 0.0,
        monthly_income: 3_000.0,
        monthly_expenses: 3_500.0,
        annual_return: 7.0,
        annual_volatility: 15.0,
        expense_volatility: 10.0,
        income_volatility: 5.0,
        emergency_probability: 2.0,
        emergency_mean_cost: 2_000.0,
        emergency_std_dev: 1_000.0,
        simulations: 1_000,
        horizon_months: 360,
        inflation_rate: 0.0,
        taxable_fraction: 100.0,
        capital_gains_tax_rate: 15.0,
        buffer_months: 6.0,
        seed: None,
        include_trials: false,
    }
}
