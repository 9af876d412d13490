//! chainformula CLI — inspect the store and evaluate formulas.
//!
//! Usage:
//! ```bash
//! chainformula info
//! chainformula eval --db ./index.db --type contract --formula cw20/balance \
//!     --address juno1... --height 12345 --args '{"address":"juno1..."}'
//! ```

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use chainformula_core::config::ComputeConfig;
use chainformula_core::registry::FormulaType;
use chainformula_core::request::{execute_query, ComputeQuery, QueryResponse, QueryTarget};
use chainformula_core::store::EventStore;
use chainformula_formulas::default_registry;
use chainformula_storage::SqliteStore;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "eval" => {
            if let Err(err) = cmd_eval(&args[2..]) {
                eprintln!("error: {err:#}");
                process::exit(1);
            }
        }
        "version" | "--version" | "-V" => {
            println!("chainformula {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("chainformula {}", env!("CARGO_PKG_VERSION"));
    println!("Formula computation engine over indexed chain state\n");
    println!("USAGE:");
    println!("    chainformula <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info     Show engine configuration and catalogue info");
    println!("    eval     Evaluate a formula against a SQLite store");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("EVAL OPTIONS:");
    println!("    --db <path>         SQLite database file");
    println!("    --type <type>       contract | validator | account | generic");
    println!("    --formula <name>    Formula name (e.g. cw20/balance)");
    println!("    --address <addr>    Target address");
    println!("    --height <height>   Block height (default: latest)");
    println!("    --args <json>       Formula arguments as a JSON object");
}

fn cmd_info() {
    let registry = match default_registry() {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };
    println!("ChainFormula v{}", env!("CARGO_PKG_VERSION"));
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Catalogue: {} formulas", registry.len());
    for formula_type in [
        FormulaType::Contract,
        FormulaType::Validator,
        FormulaType::Account,
        FormulaType::Generic,
    ] {
        let names = registry.names(formula_type);
        println!("    {} ({}): {}", formula_type, names.len(), names.join(", "));
    }
}

fn cmd_eval(args: &[String]) -> Result<()> {
    let mut db = None;
    let mut formula_type = None;
    let mut formula = None;
    let mut address = String::new();
    let mut height = None;
    let mut formula_args = serde_json::Map::new();

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .with_context(|| format!("missing value for {flag}"))
        };
        match flag.as_str() {
            "--db" => db = Some(value()?.clone()),
            "--type" => {
                let raw = value()?;
                formula_type = Some(
                    FormulaType::from_str(raw).with_context(|| format!("unknown type '{raw}'"))?,
                );
            }
            "--formula" => formula = Some(value()?.clone()),
            "--address" => address = value()?.clone(),
            "--height" => height = Some(value()?.parse::<u64>().context("bad --height")?),
            "--args" => {
                formula_args = serde_json::from_str(value()?).context("bad --args JSON")?;
            }
            other => bail!("unknown flag: {other}"),
        }
    }

    let db = db.context("--db is required")?;
    let formula_type = formula_type.context("--type is required")?;
    let formula = formula.context("--formula is required")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let store = Arc::new(SqliteStore::open(&db).await?);
        let events: Arc<dyn EventStore> = store.clone();
        let registry = default_registry()?;
        let config = Arc::new(ComputeConfig::default());

        let state = events.state().await?.context("store has no chain state")?;
        let target = QueryTarget::Block(height.unwrap_or(state.latest_block.height));

        let response = execute_query(
            &events,
            store.as_ref(),
            &config,
            &registry,
            &state.chain_id,
            ComputeQuery {
                formula_type,
                formula_name: formula,
                address,
                args: formula_args,
                target,
                block_step: None,
                time_step: None,
                on_fetch: None,
            },
        )
        .await?;

        match response {
            QueryResponse::Value { block, value } => {
                println!("block {} ({} ms)", block.height, block.time_unix_ms);
                match value {
                    Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                    None => println!("<absent>"),
                }
            }
            QueryResponse::Series(samples) => {
                println!("{}", serde_json::to_string_pretty(&samples)?);
            }
        }
        Ok(())
    })
}
