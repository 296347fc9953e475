//! Subcommand implementations. Each writes its result to `out`.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use mnemo_core::{MemoryEngine, MemoryId, MnemoConfig};
use serde_json::json;
use tracing::{debug, info};

use crate::args::{Cli, Commands, DEFAULT_CONFIG_FILE};

/// Resolve the configuration: `--config`, else `./mnemo.toml` if present,
/// else defaults. Command-line overrides are applied last.
pub fn load_config(cli: &Cli) -> Result<MnemoConfig> {
    let mut config = match &cli.config {
        Some(path) => MnemoConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            MnemoConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("loading {DEFAULT_CONFIG_FILE}"))?
        }
        None => MnemoConfig::default(),
    };

    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir.clone_from(dir);
    }
    if let Some(provider) = &cli.provider {
        config.embedding.provider.clone_from(provider);
    }
    config.validate()?;
    Ok(config)
}

/// Open the store, run the selected command, and persist on the way out.
pub async fn run(cli: &Cli, config: MnemoConfig, out: &mut impl Write) -> Result<()> {
    let provider = mnemo_embed::provider_from_config(&config.embedding)
        .context("creating embedding provider")?;
    let engine = MemoryEngine::open(config, provider)?;
    debug!(report = ?engine.open_report(), "Store opened");

    dispatch(&engine, &cli.command, cli.json, out).await?;
    engine.shutdown().context("persisting store")?;
    Ok(())
}

/// Run one command against an open engine.
pub async fn dispatch(
    engine: &MemoryEngine,
    command: &Commands,
    as_json: bool,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Commands::Observe { message, response } => {
            let message = if message == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
                buf
            } else {
                message.clone()
            };
            observe(engine, &message, response.as_deref(), as_json, out).await
        }
        Commands::Recall { query, top_k } => {
            let top_k = top_k.unwrap_or(engine.config().retrieval.top_k);
            recall(engine, query, top_k, as_json, out).await
        }
        Commands::Related { id, top_k } => related(engine, MemoryId(*id), *top_k, as_json, out),
        Commands::Stats { prometheus } => stats(engine, *prometheus, as_json, out),
        Commands::Gc => gc(engine, as_json, out),
    }
}

async fn observe(
    engine: &MemoryEngine,
    message: &str,
    response: Option<&str>,
    as_json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let created = engine.observe_interaction(message, response).await;
    info!(created = created.len(), "Interaction observed");

    if as_json {
        let memories: Vec<_> = created.iter().filter_map(|id| engine.get_memory(*id)).collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&json!({ "created": memories }))?)?;
    } else if created.is_empty() {
        writeln!(
            out,
            "No memory formed ({} candidate(s) awaiting reinforcement)",
            engine.stats().tracked_candidates
        )?;
    } else {
        for id in &created {
            if let Some(memory) = engine.get_memory(*id) {
                writeln!(out, "{id} [importance {:.1}] {}", memory.importance, memory.content)?;
            }
        }
    }
    Ok(())
}

async fn recall(
    engine: &MemoryEngine,
    query: &str,
    top_k: usize,
    as_json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let memories = engine.retrieve_memories(query, top_k).await;
    if as_json {
        writeln!(out, "{}", serde_json::to_string_pretty(&memories)?)?;
    } else if memories.is_empty() {
        writeln!(out, "No relevant memories")?;
    } else {
        write!(out, "{}", engine.format_memories_for_context(&memories))?;
    }
    Ok(())
}

fn related(
    engine: &MemoryEngine,
    id: MemoryId,
    top_k: usize,
    as_json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let related = engine.find_related(id, top_k)?;
    if as_json {
        let rows: Vec<_> = related
            .iter()
            .map(|(memory, similarity)| json!({ "memory": memory, "similarity": similarity }))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
    } else {
        for (memory, similarity) in &related {
            writeln!(out, "{} ({similarity:.3}) {}", memory.id, memory.content)?;
        }
    }
    Ok(())
}

fn stats(engine: &MemoryEngine, prometheus: bool, as_json: bool, out: &mut impl Write) -> Result<()> {
    let stats = engine.stats();
    if prometheus {
        write!(out, "{}", engine.counters().to_prometheus())?;
    } else if as_json {
        let doc = json!({ "store": stats, "counters": engine.counters() });
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
    } else {
        writeln!(out, "memories:           {}", stats.total_memories)?;
        writeln!(out, "index size:         {}", stats.index_size)?;
        writeln!(out, "total accesses:     {}", stats.total_accesses)?;
        writeln!(out, "avg accesses:       {:.2}", stats.avg_accesses)?;
        writeln!(out, "tracked candidates: {}", stats.tracked_candidates)?;
        writeln!(out, "embedding model:    {}", engine.index().embedder().model_name())?;
    }
    Ok(())
}

fn gc(engine: &MemoryEngine, as_json: bool, out: &mut impl Write) -> Result<()> {
    let removed = engine.collect_garbage()?;
    if as_json {
        writeln!(out, "{}", json!({ "removed": removed }))?;
    } else {
        writeln!(out, "Expired {removed} stale candidate(s)")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::sync::Arc;
    use mnemo_core::embedding::HashingEmbeddingProvider;

    fn engine() -> MemoryEngine {
        MemoryEngine::in_memory(MnemoConfig::default(), Arc::new(HashingEmbeddingProvider::default()))
            .expect("engine")
    }

    async fn exec(engine: &MemoryEngine, args: &[&str]) -> String {
        let cli = Cli::parse_from(std::iter::once("mnemo").chain(args.iter().copied()));
        let mut out = Vec::new();
        dispatch(engine, &cli.command, cli.json, &mut out).await.expect("command");
        String::from_utf8(out).expect("utf8")
    }

    #[tokio::test]
    async fn observe_then_recall() {
        let engine = engine();
        let text = exec(&engine, &["observe", "Remember that my locker code is 4417"]).await;
        assert!(text.starts_with("#0 [importance 2.0]"), "{text}");

        let text = exec(&engine, &["recall", "what is my locker code"]).await;
        assert!(text.contains("[RELEVANT MEMORIES]"));
        assert!(text.contains("my locker code is 4417"));
    }

    #[tokio::test]
    async fn pending_candidates_are_reported() {
        let engine = engine();
        let text = exec(&engine, &["observe", "I work as a teacher"]).await;
        assert!(text.contains("1 candidate(s) awaiting reinforcement"));
    }

    #[tokio::test]
    async fn json_outputs_parse() {
        let engine = engine();
        exec(&engine, &["observe", "Don't forget the dentist is on Friday"]).await;

        let doc: serde_json::Value =
            serde_json::from_str(&exec(&engine, &["stats", "--json"]).await).expect("json");
        assert_eq!(doc["store"]["total_memories"], 1);
        assert_eq!(doc["counters"]["bypasses"], 1);

        let doc: serde_json::Value =
            serde_json::from_str(&exec(&engine, &["recall", "dentist", "--json"]).await).expect("json");
        assert_eq!(doc[0]["memory"]["id"], 0);
    }

    #[tokio::test]
    async fn related_unknown_id_fails() {
        let engine = engine();
        let cli = Cli::parse_from(["mnemo", "related", "42"]);
        let mut out = Vec::new();
        assert!(dispatch(&engine, &cli.command, false, &mut out).await.is_err());
    }

    #[test]
    fn overrides_apply_to_loaded_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mnemo.toml");
        std::fs::write(&path, "[retrieval]\ntop_k = 7\n").expect("write");
        let cli = Cli::parse_from([
            "mnemo",
            "--config",
            path.to_str().expect("path"),
            "--data-dir",
            "/tmp/elsewhere",
            "gc",
        ]);
        let config = load_config(&cli).expect("config");
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.storage.data_dir, Path::new("/tmp/elsewhere"));
    }
}
