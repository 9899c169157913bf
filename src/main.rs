use std::env;
use std::process::ExitCode;

use contentrepo::config::{CONFIG_BASENAME, RepositoryConfig};
use contentrepo::datasource::Datasource;
use contentrepo::error::{RepositoryError, Result};
use contentrepo::filter::Filter;
use contentrepo::query::Sort;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "usage: contentrepo <filter> [--sort attr[:asc|desc]]... [--as-of ts] [--start n] [--count n]";

struct Arguments {
    filter: String,
    sorts: Vec<Sort>,
    as_of: Option<i64>,
    start: usize,
    count: Option<usize>,
}

fn number<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| RepositoryError::Config(format!("{flag} needs a number\n{USAGE}")))
}

fn parse_arguments(mut args: impl Iterator<Item = String>) -> Result<Arguments> {
    let mut filter = None;
    let mut arguments = Arguments {
        filter: String::new(),
        sorts: Vec::new(),
        as_of: None,
        start: 0,
        count: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sort" => {
                let sort = args
                    .next()
                    .ok_or_else(|| RepositoryError::Config(format!("--sort needs an attribute\n{USAGE}")))?;
                arguments.sorts.push(sort.parse()?);
            }
            "--as-of" => arguments.as_of = Some(number("--as-of", args.next())?),
            "--start" => arguments.start = number("--start", args.next())?,
            "--count" => arguments.count = Some(number("--count", args.next())?),
            _ if filter.is_none() => filter = Some(arg),
            other => return Err(RepositoryError::Config(format!("unexpected argument '{other}'\n{USAGE}"))),
        }
    }
    arguments.filter = filter.ok_or_else(|| RepositoryError::Config(USAGE.to_string()))?;
    Ok(arguments)
}

fn run() -> Result<()> {
    let arguments = parse_arguments(env::args().skip(1))?;
    let config = RepositoryConfig::load(CONFIG_BASENAME)?;
    info!(database = %config.database, dialect = %config.dialect, "starting contentrepo");
    let datasource = Datasource::open(&config)?;
    let filter = Filter::parse(&arguments.filter)?;
    let objects = datasource.get_result(
        &filter,
        &arguments.sorts,
        arguments.start,
        arguments.count,
        arguments.as_of,
    )?;
    for object in &objects {
        let line = serde_json::to_string(object)
            .map_err(|e| RepositoryError::Persistence(e.to_string()))?;
        println!("{line}");
    }
    info!(datasource = datasource.name(), objects = objects.len(), "done");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "contentrepo failed");
            ExitCode::FAILURE
        }
    }
}
