//! `payroll-batch` - scheduled and maintenance jobs for the payroll engine.
//!
//! ```text
//! payroll-batch init-db
//! payroll-batch accrue-leave [YYYY-MM]
//! payroll-batch init-balances <staff_id> [year]
//! payroll-batch carry-forward <year>
//! payroll-batch loan-schedule <principal> <annual_rate> <installments> <flat|reducing>
//! ```
//!
//! The database comes from `DATABASE_URL` and the settings from `PAYROLL_CONFIG` (or
//! `./payroll.toml`); both may be set in a `.env` file.

use dotenvy::dotenv;
use payroll_engine::{
    config::{self, Settings, database},
    core::{leave, loan, period::Period},
    entities::loan::InterestMethod,
    errors::{Error, Result},
};
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: payroll-batch <init-db | accrue-leave [YYYY-MM] | \
init-balances <staff_id> [year] | carry-forward <year> | \
loan-schedule <principal> <rate> <installments> <flat|reducing>>";

/// A batch job and its arguments
#[derive(Debug, Clone, PartialEq)]
enum Command {
    InitDb,
    AccrueLeave(Period),
    InitBalances { staff_id: i64, year: i32 },
    CarryForward { year: i32 },
    LoanSchedule {
        principal: f64,
        rate: f64,
        installments: i32,
        method: InterestMethod,
    },
}

fn parse_arg<T: std::str::FromStr>(value: Option<&String>, name: &str) -> Result<T> {
    let value = value.ok_or_else(|| Error::validation(format!("missing <{name}>. {USAGE}")))?;
    value
        .parse()
        .map_err(|_| Error::validation(format!("invalid <{name}>: '{value}'")))
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let current = Period::current();
        match args.first().map(String::as_str) {
            Some("init-db") => Ok(Self::InitDb),
            Some("accrue-leave") => Ok(Self::AccrueLeave(match args.get(1) {
                Some(period) => period.parse()?,
                None => current,
            })),
            Some("init-balances") => Ok(Self::InitBalances {
                staff_id: parse_arg(args.get(1), "staff_id")?,
                year: match args.get(2) {
                    Some(_) => parse_arg(args.get(2), "year")?,
                    None => current.year(),
                },
            }),
            Some("carry-forward") => Ok(Self::CarryForward {
                year: parse_arg(args.get(1), "year")?,
            }),
            Some("loan-schedule") => Ok(Self::LoanSchedule {
                principal: parse_arg(args.get(1), "principal")?,
                rate: parse_arg(args.get(2), "rate")?,
                installments: parse_arg(args.get(3), "installments")?,
                method: args
                    .get(4)
                    .map_or(Ok(InterestMethod::Flat), |method| method.parse())?,
            }),
            _ => Err(Error::validation(USAGE)),
        }
    }
}

async fn run(command: Command, settings: &Settings) -> Result<()> {
    if let Command::LoanSchedule {
        principal,
        rate,
        installments,
        method,
    } = command
    {
        let schedule = loan::calculate_loan_schedule(principal, rate, installments, method)?;
        println!("{}", serde_json::to_string_pretty(&schedule)?);
        return Ok(());
    }

    if database::get_database_url() == database::DEFAULT_DATABASE_URL {
        std::fs::create_dir_all("data").map_err(|e| Error::Config {
            message: format!("Failed to create data directory: {e}"),
        })?;
    }
    let db = database::create_connection().await?;
    database::create_tables(&db).await?;

    match command {
        Command::InitDb => info!("Database initialized"),
        Command::AccrueLeave(period) => {
            let summary = leave::accrue_monthly_leave(&db, period).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::InitBalances { staff_id, year } => {
            let balances = leave::initialize_staff_leave_balances(&db, staff_id, year).await?;
            println!("{}", serde_json::to_string_pretty(&balances)?);
        }
        Command::CarryForward { year } => {
            let written = leave::carry_forward_leave_balances(
                &db,
                year,
                settings.leave.max_carry_forward_days,
            )
            .await?;
            info!(year, written, "Carry-forward complete");
        }
        Command::LoanSchedule { .. } => {}
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load settings and the requested job
    let settings = config::settings::load_default_config()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;
    let args: Vec<String> = env::args().skip(1).collect();
    let command = Command::parse(&args).inspect_err(|e| error!("{}", e))?;
    info!(?command, "Starting batch job");

    // 4. Run it
    run(command, &settings)
        .await
        .inspect_err(|e| error!("Batch job failed: {}", e))
}
