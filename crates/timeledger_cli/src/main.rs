//! CLI smoke and inspection entry point.
//!
//! # Responsibility
//! - Verify `timeledger_core` linkage (`ping`, `version`).
//! - Expand one center's schedule from a SQLite file as JSON lines.

use std::process::ExitCode;
use timeledger_core::calendar::parse_date;
use timeledger_core::{EngineConfig, EngineContext, NoopCache, SqliteStore};
use uuid::Uuid;

const USAGE: &str = "usage: timeledger_cli [version | expand <db_path> <center_id> <from> <to> [config.json]]";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        None | Some("version") => {
            println!("timeledger_core ping={}", timeledger_core::ping());
            println!("timeledger_core version={}", timeledger_core::core_version());
            Ok(())
        }
        Some("expand") if args.len() == 5 || args.len() == 6 => expand(&args[1..]),
        _ => Err(USAGE.to_string()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn expand(args: &[String]) -> Result<(), String> {
    let config = match args.get(4) {
        Some(path) => EngineConfig::from_path(path).map_err(|err| err.to_string())?,
        None => EngineConfig::default(),
    };
    timeledger_core::init_logging_from_config(&config).map_err(|err| err.to_string())?;

    let center_id = Uuid::parse_str(&args[1]).map_err(|err| format!("center_id: {err}"))?;
    let from = parse_date(&args[2]).map_err(|err| format!("from: {err}"))?;
    let to = parse_date(&args[3]).map_err(|err| format!("to: {err}"))?;

    let store = SqliteStore::open(&args[0]).map_err(|err| err.to_string())?;
    let ctx = EngineContext::new(store, config).with_cache(Box::new(NoopCache));
    let sessions = ctx
        .queries()
        .expand(center_id, from, to)
        .map_err(|err| err.to_string())?;
    for session in &sessions {
        let line = serde_json::to_string(session).map_err(|err| err.to_string())?;
        println!("{line}");
    }
    log::info!(
        "event=cli_expand module=cli status=ok center_id={} sessions={}",
        center_id,
        sessions.len()
    );
    Ok(())
}
