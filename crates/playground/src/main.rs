//! Runs sample jsonflow queries against the in-memory engine.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use jsonflow::expr::build::*;
use jsonflow::expr::{ArithmeticOp, ComparisonOp};
use jsonflow::item::json::from_json_value;
use jsonflow::{BuiltinCatalogue, EngineConfig, EngineContext, Expr, Item, Module, Query};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jsonflow-playground")]
#[command(about = "Run sample FLWOR queries locally or on the in-memory engine")]
struct Cli {
    /// Sample query to run
    #[arg(long, value_enum, default_value_t = SampleQuery::Numbers)]
    query: SampleQuery,

    /// Partitions for parallelized input
    #[arg(long, default_value_t = 4)]
    partitions: usize,

    /// Worker threads of the in-memory engine
    #[arg(long)]
    threads: Option<usize>,

    /// Most items a distributed sequence may hand to local evaluation
    #[arg(long, default_value_t = 200)]
    materialization_cap: usize,

    /// Evaluate the input locally instead of parallelizing it
    #[arg(long)]
    local: bool,

    /// Upper bound of the `numbers` input range
    #[arg(long, default_value_t = 1000)]
    size: i64,

    /// Divisor filtering the `numbers` input
    #[arg(long, default_value_t = 3)]
    divisor: i64,

    /// JSON-lines file read by the `histogram` query
    #[arg(long, required_if_eq("query", "histogram"))]
    file: Option<PathBuf>,

    /// Field the `histogram` query groups by
    #[arg(long, default_value = "type")]
    field: String,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SampleQuery {
    /// Squares of the integers divisible by `--divisor`, grouped by last digit
    Numbers,
    /// Objects of `--file` counted per value of `--field`
    Histogram,
}

fn input(items: Expr, cli: &Cli) -> Expr {
    if cli.local {
        items
    } else {
        let partitions = i64::try_from(cli.partitions).unwrap_or(i64::MAX);
        call("parallelize", vec![items, lit(partitions)])
    }
}

fn numbers_query(size: i64, divisor: i64, cli: &Cli) -> Module {
    let main = flwor()
        .for_("x", input(range(lit(1_i64), lit(size)), cli))
        .where_(cmp(
            ComparisonOp::Eq,
            arith(ArithmeticOp::Mod, var("x"), lit(divisor)),
            lit(0_i64),
        ))
        .let_("sq", arith(ArithmeticOp::Mul, var("x"), var("x")))
        .group_by(vec![("digit", Some(arith(ArithmeticOp::Mod, var("sq"), lit(10_i64))))])
        .order_by(vec![(var("digit"), false)])
        .return_(object(vec![
            (lit("digit"), var("digit")),
            (lit("count"), call("count", vec![var("sq")])),
        ]));
    Module::new(main)
}

fn histogram_query(field: &str, cli: &Cli) -> Module {
    let main = flwor()
        .for_("o", input(var("data"), cli))
        .group_by(vec![("key", Some(lookup(var("o"), field)))])
        .order_by(vec![(call("count", vec![var("o")]), true)])
        .count("rank")
        .return_(object(vec![
            (lit("rank"), var("rank")),
            (lit("key"), var("key")),
            (lit("count"), call("count", vec![var("o")])),
        ]));
    Module::new(main).with_variable(declare_external("data"))
}

fn read_json_lines(path: &Path) -> Result<Vec<Item>> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut items = Vec::new();
    for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(&line).with_context(|| format!("{}:{}", path.display(), number + 1))?;
        items.push(from_json_value(value));
    }
    Ok(items)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose > 0 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = EngineConfig::builder()
        .with_partitions(cli.partitions)
        .with_materialization_cap(cli.materialization_cap);
    if let Some(threads) = cli.threads {
        config = config.with_threads(threads);
    }
    let engine = EngineContext::in_memory(config.build())?;

    let query = match (cli.query, &cli.file) {
        (SampleQuery::Numbers, _) => Query::new(numbers_query(cli.size, cli.divisor, &cli), BuiltinCatalogue)?,
        (SampleQuery::Histogram, Some(file)) => {
            let data = read_json_lines(file)?;
            info!(objects = data.len(), file = %file.display(), "input loaded");
            Query::new(histogram_query(&cli.field, &cli), BuiltinCatalogue)?.with_external_variable("data", data)
        }
        (SampleQuery::Histogram, None) => bail!("the histogram query needs --file"),
    };
    info!(query = ?cli.query, mode = %query.mode(), "evaluating");

    let mut results = 0usize;
    for item in query.iterator(&engine)? {
        println!("{}", item?);
        results += 1;
    }
    info!(results, "done");
    Ok(())
}
