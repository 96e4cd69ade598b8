use std::{env, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use log::{error, warn};

use damwatch::{
    alert::LogAlertSink,
    config::Config,
    fallback_reading,
    history::{build_history, find_gaps, upsert_manual_entries, ManualEntry},
    portal::WebPortal,
    scheduler::{
        generate_shift_times, FloodMode, ScheduledRow, SchedulerController, SchedulerOptions,
        Shift,
    },
    DamCache, Database, LiveScraper,
};

enum Command {
    Fetch,
    History {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    Gaps {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    Manual {
        file: PathBuf,
    },
    Schedule {
        shift: Shift,
        value: f64,
        flood_mode: FloodMode,
    },
    SetDosing {
        value: String,
    },
    SetTankChange {
        value: String,
    },
}

const USAGE: &str = "\
Usage: damwatch <command> [options]

Commands:
  fetch                         scrape one live reading and print it as JSON
  history [--start D] [--end D] merged dam/turbidity history (dates YYYY-MM-DD)
  gaps    [--start D] [--end D] hours where both series are missing or zero
  manual <entries.json>         backfill slots from a JSON entry list
  schedule --shift <straight|second|third> --value <V> --mode <flood|no-flood>
                                run the submission scheduler until Ctrl-C
  set-dosing <timestamp>        record the last active dosing override ('' clears)
  set-tank-change <date>        record the last chlorine tank change ('' clears)

Environment:
  DAMWATCH_HOME                 data directory (default: current directory)
  DAMWATCH_USERNAME/_PASSWORD   portal credentials (override the config file)
  RUST_LOG                      log filter (default: info)";

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = match parse_cli() {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err:#}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let home = data_dir();
    let config = Config::load(&home.join("damwatch.json"))?;
    let db = Database::new(home.join("damwatch.sqlite3"))?;
    let cache = DamCache::new(home.join("dam_cache.json"));

    match command {
        Command::Fetch => {
            let connector = Arc::new(WebPortal::new(config.clone()));
            let scraper = LiveScraper::new(config, db.clone(), cache.clone(), connector);
            let reading = match scraper.fetch_live_reading().await {
                Ok(reading) => reading,
                Err(err) => {
                    warn!("live scrape failed: {err}");
                    fallback_reading(&db, &cache, Local::now().naive_local(), Some(err.to_string()))
                        .await
                }
            };
            println!("{}", serde_json::to_string_pretty(&reading)?);
        }
        Command::History { start, end } => {
            let days = build_history(&db, start, end).await?;
            println!("{}", serde_json::to_string_pretty(&days)?);
        }
        Command::Gaps { start, end } => {
            let report = find_gaps(&db, start, end).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Manual { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let entries: Vec<ManualEntry> = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a valid entry list", file.display()))?;
            let saved = upsert_manual_entries(&db, &entries).await?;
            println!("saved {saved} slots");
        }
        Command::Schedule {
            shift,
            value,
            flood_mode,
        } => {
            let rows: Vec<ScheduledRow> = generate_shift_times(shift)
                .into_iter()
                .enumerate()
                .map(|(index, time)| ScheduledRow { index, time, value })
                .collect();
            for row in &rows {
                println!("row {:>2} fires at {}", row.index, row.time);
            }

            let connector = Arc::new(WebPortal::new(config.clone()));
            let options = SchedulerOptions {
                flood_mode,
                alarm_enabled: config.alarm_enabled,
            };
            let mut controller =
                SchedulerController::new(config, connector, Arc::new(LogAlertSink));
            controller.start(rows, options)?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            controller.stop().await?;
        }
        Command::SetDosing { value } => match cache.set_last_active_dosing(&value) {
            Some(stored) => println!("last active dosing set to {stored}"),
            None => println!("last active dosing override cleared"),
        },
        Command::SetTankChange { value } => match cache.set_last_chlorine_tank_change(&value) {
            Some(stored) => println!("last chlorine tank change set to {stored}"),
            None => println!("last chlorine tank change override cleared"),
        },
    }

    Ok(())
}

fn data_dir() -> PathBuf {
    env::var_os("DAMWATCH_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_cli() -> Result<Command> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        bail!("missing command");
    };

    match command.as_str() {
        "fetch" => Ok(Command::Fetch),
        "history" | "gaps" => {
            let mut start = None;
            let mut end = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--start" => start = Some(parse_date_arg(&mut args, "--start")?),
                    "--end" => end = Some(parse_date_arg(&mut args, "--end")?),
                    other => bail!("unknown option {other}"),
                }
            }
            if command == "history" {
                Ok(Command::History { start, end })
            } else {
                Ok(Command::Gaps { start, end })
            }
        }
        "manual" => {
            let Some(file) = args.next() else {
                bail!("manual requires a JSON file path");
            };
            Ok(Command::Manual {
                file: PathBuf::from(file),
            })
        }
        "schedule" => {
            let mut shift = None;
            let mut value = None;
            let mut flood_mode = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--shift" => {
                        let raw = args.next().context("--shift requires a value")?;
                        shift = Some(raw.parse::<Shift>()?);
                    }
                    "--value" => {
                        let raw = args.next().context("--value requires a number")?;
                        value = Some(raw.parse::<f64>().context("--value must be numeric")?);
                    }
                    "--mode" => {
                        let raw = args.next().context("--mode requires a value")?;
                        flood_mode = Some(raw.parse::<FloodMode>()?);
                    }
                    other => bail!("unknown option {other}"),
                }
            }
            Ok(Command::Schedule {
                shift: shift.context("schedule requires --shift")?,
                value: value.context("schedule requires --value")?,
                flood_mode: flood_mode.context("schedule requires --mode")?,
            })
        }
        "set-dosing" => Ok(Command::SetDosing {
            value: args.next().unwrap_or_default(),
        }),
        "set-tank-change" => Ok(Command::SetTankChange {
            value: args.next().unwrap_or_default(),
        }),
        "-h" | "--help" => {
            println!("{USAGE}");
            std::process::exit(0);
        }
        other => bail!("unknown command {other}"),
    }
}

fn parse_date_arg(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<NaiveDate> {
    let raw = args.next().with_context(|| format!("{flag} requires a date"))?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .with_context(|| format!("{flag} expects YYYY-MM-DD, got {raw:?}"))
}
