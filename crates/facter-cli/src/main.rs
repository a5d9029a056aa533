//! facter - collect system facts, extended by Lua plugins
//!
//! # Configuration
//!
//! Configuration is loaded from multiple sources with priority:
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`FACTER_*`)
//! 3. Config file given with `--config`
//! 4. Global config (`~/.facter/facter.toml`)
//! 5. Default values (lowest priority)
//!
//! # Output
//!
//! - no query: every fact as `name => value`, sorted by name
//! - one query: the bare value
//! - several queries: `query => value` per query
//!
//! `--json` prints a JSON object keyed by fact name or query instead.
//! Queries may use dotted paths (`os.family`) to reach into structured
//! facts.

use anyhow::{Context, Result};
use clap::Parser;
use facter_core::config::{ConfigLoader, FacterConfig};
use facter_core::{logging, Collection, LogLevel, Value};
use facter_lua::{RuntimeSession, SessionOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// facter - collect system facts, extended by Lua plugins
#[derive(Parser, Debug)]
#[command(name = "facter")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory to search for Lua custom facts (repeatable)
    #[arg(long = "custom-dir", value_name = "DIR")]
    custom_dirs: Vec<PathBuf>,

    /// Directory to search for external facts (repeatable)
    #[arg(long = "external-dir", value_name = "DIR")]
    external_dirs: Vec<PathBuf>,

    /// Disable Lua custom facts (also: FACTER_NO_CUSTOM_FACTS)
    #[arg(long)]
    no_custom_facts: bool,

    /// Disable external facts (also: FACTER_NO_EXTERNAL_FACTS)
    #[arg(long)]
    no_external_facts: bool,

    /// Print results as JSON
    #[arg(short, long)]
    json: bool,

    /// Log level: trace, debug, info, warn, error or none (also: FACTER_LOG_LEVEL)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Config file to load after the global one
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Facts to print; dotted paths reach into structured facts
    queries: Vec<String>,
}

impl Args {
    /// Applies the command-line flags on top of the loaded config.
    fn apply(&self, config: &mut FacterConfig) {
        let overrides = FacterConfig {
            global: facter_core::config::GlobalConfig {
                custom_dirs: self.custom_dirs.clone(),
                external_dirs: self.external_dirs.clone(),
                no_custom_facts: self.no_custom_facts,
                no_external_facts: self.no_external_facts,
            },
            cli: facter_core::config::CliConfig {
                log_level: self.log_level,
            },
        };
        config.merge(&overrides);
    }
}

/// Where fact values come from.
enum Facts {
    /// Native facts plus Lua custom facts.
    Lua(RuntimeSession),
    /// Native and external facts only.
    Native(Collection),
}

impl Facts {
    fn value(&self, name: &str) -> Result<Option<Value>> {
        match self {
            Self::Lua(session) => match session.bridge() {
                Some(bridge) => bridge
                    .value(name)
                    .with_context(|| format!("failed to resolve fact {name}")),
                None => Ok(None),
            },
            Self::Native(collection) => Ok(collection.get(&name.to_lowercase()).cloned()),
        }
    }

    fn all(&self) -> Result<BTreeMap<String, Value>> {
        match self {
            Self::Lua(session) => match session.bridge() {
                Some(bridge) => bridge.to_hash().context("failed to resolve facts"),
                None => Ok(BTreeMap::new()),
            },
            Self::Native(collection) => {
                let mut facts = BTreeMap::new();
                collection.each(|name, value| {
                    facts.insert(name.to_string(), value.clone());
                    true
                });
                Ok(facts)
            }
        }
    }
}

fn paths_to_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

fn native_facts(config: &FacterConfig) -> Facts {
    let mut collection = Collection::new();
    collection.add_default_facts();
    if !config.global.no_external_facts {
        collection.add_external_facts(&paths_to_strings(&config.global.external_dirs));
    }
    Facts::Native(collection)
}

fn open_facts(config: &FacterConfig) -> Result<Facts> {
    if config.global.no_custom_facts {
        logging::init(config.cli.log_level);
        debug!("custom facts disabled");
        return Ok(native_facts(config));
    }

    let external = if config.global.no_external_facts {
        Vec::new()
    } else {
        paths_to_strings(&config.global.external_dirs)
    };
    let options = SessionOptions::new()
        .log_level(config.cli.log_level)
        .search_paths(paths_to_strings(&config.global.custom_dirs))
        .external_paths(external);

    match RuntimeSession::start(options).context("failed to start Lua runtime")? {
        Some(session) => Ok(Facts::Lua(session)),
        None => Ok(native_facts(config)),
    }
}

/// Splits `os.family` into the fact name and the path inside it.
fn split_query(query: &str) -> (&str, Option<&str>) {
    match query.split_once('.') {
        Some((name, path)) => (name, Some(path)),
        None => (query, None),
    }
}

fn query(facts: &Facts, query: &str) -> Result<Option<Value>> {
    let (name, path) = split_query(query);
    let Some(value) = facts.value(name)? else {
        return Ok(None);
    };
    Ok(match path {
        Some(path) => value.lookup(path).cloned(),
        None => Some(value),
    })
}

fn print_json(results: &BTreeMap<String, Option<Value>>) -> Result<()> {
    let object: serde_json::Map<String, serde_json::Value> = results
        .iter()
        .map(|(name, value)| -> Result<_, serde_json::Error> {
            let json = match value {
                Some(value) => serde_json::to_value(value)?,
                None => serde_json::Value::Null,
            };
            Ok((name.clone(), json))
        })
        .collect::<Result<_, serde_json::Error>>()?;
    println!("{}", serde_json::to_string_pretty(&object)?);
    Ok(())
}

fn print_plain(results: &BTreeMap<String, Option<Value>>, bare: bool) {
    for (name, value) in results {
        let text = value.as_ref().map(ToString::to_string).unwrap_or_default();
        if bare {
            println!("{text}");
        } else {
            println!("{name} => {text}");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_file(path);
    }
    let mut config = loader
        .load()
        .map_err(|e| anyhow::anyhow!("Config error: {e}"))?;
    args.apply(&mut config);

    let facts = open_facts(&config)?;

    let results: BTreeMap<String, Option<Value>> = if args.queries.is_empty() {
        facts
            .all()?
            .into_iter()
            .map(|(name, value)| (name, Some(value)))
            .collect()
    } else {
        args.queries
            .iter()
            .map(|q| -> Result<_> { Ok((q.clone(), query(&facts, q)?)) })
            .collect::<Result<_>>()?
    };

    if args.json {
        print_json(&results)?;
    } else {
        print_plain(&results, args.queries.len() == 1);
    }
    Ok(())
}
