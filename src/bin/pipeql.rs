//! pipeql: pipe-syntax SQL from the command line
//!
//! # Usage
//!
//! ```bash
//! # Execute a query
//! pipeql "FROM apache_logs |> WHERE status >= 500 |> AGGREGATE count(*) AS c"
//!
//! # Dry run (show SQL only)
//! pipeql "FROM apache_logs |> LIMIT 10" --dry-run --strategy flat
//!
//! # Bind the editor placeholders
//! pipeql --file query.sql --var start=1700000000 --var end=1700003600
//! ```

use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pipeql::parser::TokenKind;
use pipeql::prelude::*;
use pipeql::timeseries::{self, TimeSeriesRequest};
use pipeql::transpiler::{render, stages};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeql")]
#[command(version)]
#[command(about = "Pipe-syntax SQL for ClickHouse", long_about = None)]
#[command(after_help = "EXAMPLES:
    pipeql 'FROM logs |> WHERE $is_error(severity) |> AGGREGATE count(*) AS c'
    pipeql 'FROM logs |> ENRICH ip(client_ip) AS geo |> LIMIT 5' --format json
    pipeql 'FROM logs |> WHERE ts BETWEEN $start AND $end' --var start=0 --var end=1 --dry-run")]
struct Cli {
    /// The pipe query to execute
    query: Option<String>,

    /// Read the query from a file
    #[arg(long, value_name = "PATH", conflicts_with = "query")]
    file: Option<PathBuf>,

    /// Don't execute, just show the generated SQL
    #[arg(short, long)]
    dry_run: bool,

    /// Shape of the generated SQL
    #[arg(short, long, value_enum, default_value = "cte")]
    strategy: StrategyArg,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Bind `$name` to a value (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", global = true)]
    vars: Vec<String>,

    /// Store connection URL (MySQL protocol)
    #[arg(long, env = "PIPEQL_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Cte,
    Flat,
}

impl From<StrategyArg> for Strategy {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::Cte => Strategy::Cte,
            StrategyArg::Flat => Strategy::Flat,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tokens, stages and generated SQL for a query
    Explain {
        /// The pipe query to explain
        query: String,
    },
    /// Hourly row counts of a table
    Timeseries {
        /// Table to count
        table: String,
        /// Range start, unix seconds
        #[arg(long)]
        start: i64,
        /// Range end, unix seconds
        #[arg(long)]
        end: i64,
    },
    /// List the available macros
    Macros,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Explain { query }) => explain_query(query, &cli).await,
        Some(Commands::Timeseries { table, start, end }) => {
            run_timeseries(table, *start, *end, &cli).await
        }
        Some(Commands::Macros) => show_macros(&cli),
        None => match read_query(&cli) {
            Ok(Some(query)) => execute_query(&query, &cli).await,
            Ok(None) => {
                println!("{}", "pipeql: pipe-syntax SQL".cyan().bold());
                println!();
                println!("Usage: pipeql <QUERY> [OPTIONS]");
                println!();
                println!("Try: pipeql --help");
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pipeql=debug" } else { "pipeql=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_query(cli: &Cli) -> Result<Option<String>> {
    let raw = match (&cli.query, &cli.file) {
        (Some(q), _) => q.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => return Ok(None),
    };
    Ok(Some(strip_comments(&raw)))
}

fn load(cli: &Cli) -> Result<(PipeConfig, Pipeline)> {
    let config = PipeConfig::load(cli.config.as_deref())?;
    let mut pipeline = Pipeline::from_config(&config)?;
    for var in &cli.vars {
        let Some((name, value)) = var.split_once('=') else {
            bail!("--var expects NAME=VALUE, got '{var}'");
        };
        pipeline
            .macros_mut()
            .register(name.trim_start_matches('$'), Vec::new(), value, "command-line variable")?;
    }
    Ok((config, pipeline))
}

async fn connect(cli: &Cli, config: &PipeConfig) -> Result<PipeDB> {
    let options = config.connect_options(cli.database_url.as_deref())?;
    if cli.verbose {
        println!("{}", "Connecting to store...".dimmed());
    }
    Ok(PipeDB::connect_with(options, config.store.max_connections).await?)
}

async fn execute_query(query: &str, cli: &Cli) -> Result<()> {
    if cli.verbose {
        println!("{} {}", "Input:".dimmed(), query.yellow());
    }

    let (config, pipeline) = load(cli)?;
    let strategy = Strategy::from(cli.strategy);

    if cli.dry_run {
        let sql = pipeline.transpile_offline(query, strategy).await?;
        println!("{}", "Transpiled SQL:".green().bold());
        println!("{}", sql.white());
        return Ok(());
    }

    let db = connect(cli, &config).await?;
    match db.transpile_and_run(&pipeline, query, strategy).await {
        Ok(response) => {
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Table => {
                    println!("{}", "Transpiled SQL:".green().bold());
                    println!("{}", response.transpiled_sql.white());
                    println!();
                    print_table(&response.table);
                }
            }
            Ok(())
        }
        Err(e) => {
            if let OutputFormat::Json = cli.format {
                println!("{}", serde_json::to_string_pretty(&e.to_response())?);
            } else if let Some(sql) = &e.transpiled_sql {
                eprintln!("{}", "Transpiled SQL:".yellow().bold());
                eprintln!("{}", sql.dimmed());
            }
            Err(e.into())
        }
    }
}

fn print_table(table: &Table) {
    if table.rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    let mut widths: Vec<usize> = table.names.iter().map(|n| n.chars().count()).collect();
    for row in &table.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let header: Vec<String> = table
        .names
        .iter()
        .zip(&widths)
        .map(|(n, w)| format!("{:w$}", n, w = *w))
        .collect();
    println!("{}", header.join(" │ ").white().bold());

    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in &table.rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| {
                let padded = format!("{:w$}", c, w = *w);
                if c == pipeql::engine::NULL_CELL {
                    padded.dimmed().to_string()
                } else {
                    padded
                }
            })
            .collect();
        println!("{}", cells.join(" │ "));
    }

    println!();
    println!("{} row(s) returned", table.rows.len().to_string().cyan());
}

async fn explain_query(query: &str, cli: &Cli) -> Result<()> {
    let query = strip_comments(query);
    let (_, pipeline) = load(cli)?;

    println!("{}", "pipeql Query Explanation".cyan().bold());
    println!();
    println!("{} {}", "Query:".dimmed(), query.yellow());
    println!();

    println!("{}", "Tokens:".green().bold());
    for token in pipeline.lexer(&query) {
        let token = token?;
        if token.is_trivia() {
            continue;
        }
        let kind = format!("{:?}", token.kind);
        let text = match token.kind {
            TokenKind::Keyword => token.text.cyan().bold(),
            TokenKind::Parameter => token.text.magenta(),
            TokenKind::String | TokenKind::Number => token.text.yellow(),
            _ => token.text.white(),
        };
        println!("  {:>5} {:12} {}", token.offset.to_string().dimmed(), kind.dimmed(), text);
    }

    let mut tree = pipeline.parse(&query)?;
    pipeline.prepare(&mut tree)?;
    let found = stages::stages(&tree);
    println!();
    println!("{} {}", "Stages:".green().bold(), found.len().to_string().cyan());
    for (id, stage) in found {
        let args = stages::stage_args(&tree, id);
        println!(
            "  {} {}",
            stage.op.to_string().cyan(),
            pipeql::transpiler::codegen::render_nodes(&tree, &args).white()
        );
    }
    println!();
    println!("{}", "After macro expansion:".green().bold());
    println!("  {}", render(&tree).white());

    println!();
    println!("{}", "Generated SQL:".green().bold());
    match pipeline.transpile_offline(&query, cli.strategy.into()).await {
        Ok(sql) => println!("  {}", sql.white()),
        Err(e) => println!("  {} {}", format!("{}:", e.kind()).red(), e),
    }
    Ok(())
}

async fn run_timeseries(table: &str, start: i64, end: i64, cli: &Cli) -> Result<()> {
    if end < start {
        bail!("--end must not be before --start");
    }
    let (config, pipeline) = load(cli)?;
    let request = TimeSeriesRequest {
        query: String::new(),
        start_date: start,
        end_date: end,
        table_name: table.to_string(),
    };

    if cli.verbose {
        println!("{} {}", "Query:".dimmed(), timeseries::build_query(&config, &request).yellow());
    }

    let db = connect(cli, &config).await?;
    let series = timeseries::run(&db, &pipeline, &config, &request).await?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&series)?),
        OutputFormat::Table => {
            for point in &series.data {
                println!("{}  {}", point.date.white(), point.count.to_string().cyan());
            }
            println!();
            println!("{} bucket(s)", series.data.len().to_string().cyan());
        }
    }
    Ok(())
}

fn show_macros(cli: &Cli) -> Result<()> {
    let (_, pipeline) = load(cli)?;

    println!("{}", "pipeql Macro Reference".cyan().bold());
    println!();
    println!(
        "{:40} {}",
        "Invocation".white().bold(),
        "Description".white().bold()
    );
    println!("{}", "─".repeat(80).dimmed());

    for def in pipeline.macros().iter() {
        println!("{:40} {}", def.signature().cyan().bold(), def.description.white());
        println!("{:40} {}", "", def.body_text().dimmed());
    }

    let enrichments: Vec<_> = pipeline.enrichments().iter().collect();
    if !enrichments.is_empty() {
        println!();
        println!("{}", "Enrichments".white().bold());
        println!("{}", "─".repeat(80).dimmed());
        for e in enrichments {
            println!(
                "{:40} {}",
                format!("ENRICH {}(column)", e.name).cyan().bold(),
                format!("{} joined on {}", e.table, e.key).white()
            );
        }
    }
    Ok(())
}
