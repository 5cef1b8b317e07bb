use anyhow::{Context, Result};
use crossterm::style::Stylize;
use lexicon_core::{
    AppConfig, FileStore, KeyValueStore, LexicalCache, LexiconEngine, MemoryStore, ObservationBatch, Stemmer,
    WordFlag,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let store = open_store(&config);
    let engine = LexiconEngine::new(Arc::new(LexicalCache::new(config.cache.clone(), store)));

    eprintln!("{}", "Reading lexicon engine. One command per line, 'EXIT' to flush and quit.".bold());
    eprintln!("{}", "---------------------------------------------------------------".dark_grey());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let stemmer = Stemmer::new();

    while let Some(line) = lines.next_line().await? {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = parts.split_first() else {
            continue;
        };
        debug!(command, "received command");

        let response = match command.to_ascii_uppercase().as_str() {
            "EXIT" => break,
            "OBSERVE" => match scoped(args) {
                Some((user, location, rest)) => match parse_batch(rest) {
                    Ok(batch) => state(engine.on_words_observed(location, user, &batch).await),
                    Err(e) => error(e),
                },
                None => usage("OBSERVE <user> <location> word:count..."),
            },
            "WITHDRAW" => match scoped(args) {
                Some((user, location, stems)) => state(engine.on_words_withdrawn(location, user, stems).await),
                None => usage("WITHDRAW <user> <location> stem..."),
            },
            "KNOWN" | "LIBRARY" => {
                let flag = if command.eq_ignore_ascii_case("KNOWN") { WordFlag::Known } else { WordFlag::Library };
                match scoped(args) {
                    Some((user, location, stems)) => state(engine.mark(location, user, stems, flag).await),
                    None => usage("KNOWN|LIBRARY <user> <location> stem..."),
                }
            }
            "QUERY" => match scoped(args) {
                Some((user, location, _)) => state(engine.query(location, user).await),
                None => usage("QUERY <user> <location>"),
            },
            "CLOSE" => match scoped(args) {
                Some((user, location, _)) => state(engine.close_scope(location, user).await),
                None => usage("CLOSE <user> <location>"),
            },
            "CLEAR" => match args.first() {
                Some(user) => json!({ "cleared": engine.clear_user(user).await }),
                None => usage("CLEAR <user>"),
            },
            "SWEEP" => match args.first() {
                Some(user) => json!({ "swept": engine.sweep_expired(user).await }),
                None => usage("SWEEP <user>"),
            },
            "STATS" => serde_json::to_value(engine.stats())?,
            "STEM" => Value::Object(
                args.iter().map(|word| (word.to_string(), Value::from(stemmer.stem(word)))).collect(),
            ),
            "FORMS" => match args.first() {
                Some(word) => json!(stemmer.all_forms(word)),
                None => usage("FORMS <word>"),
            },
            other => error(format!("unknown command {other}")),
        };

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    eprintln!("{}", "Flushing durable writes...".yellow());
    engine.flush().await;
    eprintln!("{}", "Done.".green());
    Ok(())
}

fn open_store(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    let Some(path) = &config.store.path else {
        return Arc::new(MemoryStore::new());
    };
    match FileStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "durable store unavailable, running memory-only");
            eprintln!("{} {}", "warning:".yellow().bold(), "durable store unavailable, state will not survive restart");
            Arc::new(MemoryStore::new())
        }
    }
}

fn scoped<'a>(args: &'a [&'a str]) -> Option<(&'a str, &'a str, &'a [&'a str])> {
    match args {
        [user, location, rest @ ..] => Some((*user, *location, rest)),
        _ => None,
    }
}

fn parse_batch(pairs: &[&str]) -> Result<ObservationBatch, String> {
    let mut batch = ObservationBatch::new();
    for pair in pairs {
        let (word, count) = match pair.rsplit_once(':') {
            Some((word, count)) => {
                let count = count.parse::<u64>().map_err(|_| format!("bad count in {pair:?}"))?;
                (word, count)
            }
            None => (*pair, 1),
        };
        *batch.entry(word.to_string()).or_insert(0) += count;
    }
    Ok(batch)
}

fn state(aggregate: lexicon_core::Aggregate) -> Value {
    json!({
        "stems": aggregate.len(),
        "occurrences": aggregate.total_occurrences(),
        "words": aggregate.ranked(),
    })
}

fn usage(text: &str) -> Value {
    json!({ "error": format!("usage: {text}") })
}

fn error(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}
