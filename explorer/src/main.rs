//! Inspection CLI for autonomous exploration sessions.
//!
//! Sessions are written by the library's exploration loop to
//! `.explorer/sessions/<id>.json` (step ledger) and `<id>.graph.json`
//! (navigation graph). These commands read them back for analysis.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use explorer::core::graph::NavigationGraph;
use explorer::exit_codes;
use explorer::io::config::{ExplorerConfig, load_config, write_config};
use explorer::io::graph_store::load_graph;
use explorer::io::ledger_store::LedgerStore;
use explorer::logging;
use serde::Serialize;

const DEFAULT_SESSIONS_DIR: &str = ".explorer/sessions";
const DEFAULT_CONFIG_PATH: &str = ".explorer/config.toml";

#[derive(Parser)]
#[command(
    name = "explorer",
    version,
    about = "Inspect autonomous UI exploration sessions"
)]
struct Cli {
    /// Directory holding session ledgers and graphs.
    #[arg(long, global = true, default_value = DEFAULT_SESSIONS_DIR)]
    dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print coverage statistics for a session's navigation graph as JSON.
    Stats { session: String },
    /// List navigation cycles (e.g. back-button loops) in a session's graph.
    Cycles {
        session: String,
        /// Collapse rotations of the same cycle.
        #[arg(short, long)]
        unique: bool,
    },
    /// Print the fastest observed action sequence between two screens.
    Route {
        session: String,
        from: String,
        to: String,
    },
    /// List sessions, or summarize one session's ledger.
    Ledger {
        session: Option<String>,
        /// Group steps by screen instead of listing them in order.
        #[arg(long)]
        map: bool,
        /// Only show the last N steps.
        #[arg(long, value_name = "N")]
        last: Option<usize>,
    },
    /// Write a config file populated with defaults.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate a config file.
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let store = LedgerStore::new(&cli.dir);
    match cli.command {
        Command::Stats { session } => cmd_stats(&store, &session),
        Command::Cycles { session, unique } => cmd_cycles(&store, &session, unique),
        Command::Route { session, from, to } => cmd_route(&store, &session, &from, &to),
        Command::Ledger { session, map, last } => match session {
            Some(session) => cmd_ledger_show(&store, &session, map, last),
            None => cmd_ledger_list(&store),
        },
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
        Command::CheckConfig { path } => cmd_check_config(&path),
    }
}

fn open_graph(store: &LedgerStore, session: &str) -> Result<NavigationGraph> {
    let path = store.graph_path_for(session);
    if !path.exists() {
        bail!("no graph recorded for session {session} at {}", path.display());
    }
    load_graph(&path)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}

#[derive(Serialize)]
struct StatsReport<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    coverage: explorer::core::graph::CoverageStats,
    frontier: Vec<&'a str>,
}

fn cmd_stats(store: &LedgerStore, session: &str) -> Result<i32> {
    let graph = open_graph(store, session)?;
    let report = StatsReport {
        session_id: session,
        coverage: graph.coverage_stats(),
        frontier: graph.unexplored_frontier(),
    };
    print_json(&report)?;
    Ok(exit_codes::OK)
}

fn cmd_cycles(store: &LedgerStore, session: &str, unique: bool) -> Result<i32> {
    let graph = open_graph(store, session)?;
    let cycles = if unique {
        graph.unique_cycles()
    } else {
        graph.find_cycles()
    };
    for cycle in &cycles {
        println!("{}", format_cycle(cycle));
    }
    Ok(exit_codes::OK)
}

fn format_cycle(cycle: &[String]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(String::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}

fn cmd_route(store: &LedgerStore, session: &str, from: &str, to: &str) -> Result<i32> {
    let graph = open_graph(store, session)?;
    for fingerprint in [from, to] {
        if !graph.contains(fingerprint) {
            bail!("screen {fingerprint} not found in session {session}");
        }
    }
    let Some(route) = graph.shortest_route(from, to) else {
        eprintln!("no route from {from} to {to}");
        return Ok(exit_codes::UNREACHABLE);
    };
    let actions: Vec<_> = route.transitions.iter().map(|edge| &edge.action).collect();
    print_json(&serde_json::json!({
        "from": from,
        "to": to,
        "total_duration_ms": route.total_duration_ms,
        "actions": actions,
    }))?;
    Ok(exit_codes::OK)
}

fn cmd_ledger_list(store: &LedgerStore) -> Result<i32> {
    for session in store.list_sessions()? {
        println!("{session}");
    }
    Ok(exit_codes::OK)
}

fn cmd_ledger_show(
    store: &LedgerStore,
    session: &str,
    map: bool,
    last: Option<usize>,
) -> Result<i32> {
    let path = store.load(session)?;
    println!("session: {}", path.session_id);
    println!("goal: {}", path.goal);
    println!(
        "steps: {} ({:.0}% successful)",
        path.steps.len(),
        path.success_rate() * 100.0
    );
    if let Some(metadata) = &path.metadata {
        if let Some(reason) = &metadata.stop_reason {
            println!("stopped: {reason}");
        }
        println!(
            "screens: {}, transitions: {}",
            metadata.screens_discovered, metadata.transitions_recorded
        );
    }
    println!();
    if map {
        print!("{}", path.compact_map());
    } else if let Some(summary) =
        path.recent_steps_summary(last.unwrap_or(path.steps.len()))
    {
        println!("{summary}");
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ExplorerConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check_config(path: &Path) -> Result<i32> {
    load_config(path)?;
    println!("ok");
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_route() {
        let cli = Cli::try_parse_from(["explorer", "route", "s1", "A", "B"]).expect("parse");
        assert_eq!(cli.dir, PathBuf::from(DEFAULT_SESSIONS_DIR));
        assert!(matches!(
            cli.command,
            Command::Route { ref session, ref from, ref to }
                if session == "s1" && from == "A" && to == "B"
        ));
    }

    #[test]
    fn parse_ledger_without_session_lists() {
        let cli = Cli::try_parse_from(["explorer", "--dir", "out", "ledger"]).expect("parse");
        assert_eq!(cli.dir, PathBuf::from("out"));
        assert!(matches!(
            cli.command,
            Command::Ledger {
                session: None,
                map: false,
                last: None
            }
        ));
    }

    #[test]
    fn parse_cycles_unique() {
        let cli = Cli::try_parse_from(["explorer", "cycles", "s1", "--unique"]).expect("parse");
        assert!(matches!(cli.command, Command::Cycles { unique: true, .. }));
    }

    #[test]
    fn check_config_reports_the_offending_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_steps = 0\n").expect("write");

        let err = cmd_check_config(&path).expect_err("zero max_steps");
        let message = format!("{err:#}");
        assert!(message.contains("max_steps must be > 0"), "{message}");
        assert_eq!(message.matches("config.toml").count(), 1, "{message}");

        std::fs::write(&path, "max_steps = 4\n").expect("write");
        assert_eq!(cmd_check_config(&path).expect("valid"), exit_codes::OK);
    }

    #[test]
    fn cycles_render_closed() {
        let cycle = vec!["A".to_string(), "B".to_string()];
        assert_eq!(format_cycle(&cycle), "A -> B -> A");
    }
}
