// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
pub mod config;
mod graph;
mod kubernetes;
mod output;
pub mod progress;
mod sync;

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

use chrono::{DateTime, Utc};
use cli::{Args, Command};
use graph::builder;
use graph::filter::FilterConfig;
use graph::{GraphOptions, TopologyGraph, spotlight};
use kubernetes::backend::ClusterBackend;
use kubernetes::{ClientPool, KubeBackend, kinds};
use output::QueryResult;
use sync::{
    MetricsFetcher, MetricsOptions, ScopeKey, SubscriptionHandle, SubscriptionRegistry,
    SyncOptions, SyncPhase,
};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool, to_stderr: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    // Create log directory
    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // File appender with size-based rotation:
    // - Max 10MB per file
    // - Keep up to 5 files (total max ~50MB)
    // - Also rotate daily
    let log_path = log_dir.join("k8map.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024); // 10MB

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    // Use non-blocking writer for better performance
    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "k8map=debug" } else { "k8map=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // File layer (always enabled)
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if to_stderr {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let mut args = Args::parse();
    init_logging(args.verbose, args.verbose);

    let config = config::Config::load().unwrap_or_default();

    // --context overrides the saved selection, which overrides the
    // kubeconfig current context
    let context_arg = args
        .context
        .clone()
        .or_else(|| config.selected_context.clone());

    let spinner = progress::create_spinner("Connecting to Kubernetes...");
    let pool = Arc::new(ClientPool::new(context_arg.as_deref())?);
    let mut progress_rx = pool.progress().subscribe();

    // Initialize the pool while relaying progress onto the spinner
    let init_result = {
        let pool = Arc::clone(&pool);
        let mut init_handle = Box::pin(async move { pool.initialize().await });

        loop {
            tokio::select! {
                biased;
                progress = progress_rx.recv() => {
                    match progress {
                        Ok(progress::ProgressUpdate::Connecting { cluster }) => {
                            spinner.set_message(format!("Connecting to {}...", cluster));
                        }
                        Ok(progress::ProgressUpdate::Connected { cluster, elapsed_ms }) => {
                            spinner.set_message(format!("Connected to {} ({}ms)", cluster, elapsed_ms));
                        }
                        _ => {}
                    }
                }
                result = &mut init_handle => {
                    break result;
                }
            }
        }
    };
    spinner.finish_and_clear();
    init_result?;

    let context = pool.current_context().await;
    let backend: Arc<dyn ClusterBackend> = Arc::new(KubeBackend::new(Arc::clone(&pool)));

    let sync_options = SyncOptions {
        poll_interval: Duration::from_secs(config.poll_interval_secs),
        ..Default::default()
    };
    let registry = SubscriptionRegistry::new(Arc::clone(&backend), sync_options);

    // Default invocation shows the topology with the saved options
    let command = args.command.take().unwrap_or(Command::Graph {
        pods: config.graph_include_pods,
        storage: config.graph_include_storage,
        jobs: false,
        replicasets: false,
        no_ingress: false,
        search: None,
        hide_non_matches: false,
        collapse: true,
        expand: Vec::new(),
        hide_kind: Vec::new(),
    });

    let result = match command {
        Command::Snapshot { kind, with_metrics } => {
            run_snapshot(&registry, &backend, &args, &config, &context, &kind, with_metrics).await
        }
        Command::Watch { kind, duration } => {
            run_watch(&registry, &args, &context, &kind, duration).await
        }
        Command::Graph {
            pods,
            storage,
            jobs,
            replicasets,
            no_ingress,
            search,
            hide_non_matches,
            collapse,
            expand,
            hide_kind,
        } => {
            let options = GraphOptions {
                include_pods: pods || config.graph_include_pods,
                include_storage: storage || config.graph_include_storage,
                include_jobs: jobs,
                include_replicasets: replicasets,
                include_ingress: !no_ingress,
            };
            let cfg = FilterConfig {
                hidden_kinds: hide_kind
                    .iter()
                    .map(|k| canonical_kind(k).map(String::from).unwrap_or_else(|_| k.clone()))
                    .collect(),
                namespace: args.namespace.clone(),
                search: search.unwrap_or_default(),
                hide_non_matches,
                group_controllers: collapse,
                expanded_controllers: expand.into_iter().collect::<BTreeSet<String>>(),
            };
            run_graph(&backend, &args, &context, &options, &cfg).await
        }
        Command::Search { query } => run_search(&backend, &args, &context, &query).await,
        Command::Contexts => run_contexts(&pool).await,
    };

    registry.shutdown();
    result
}

/// Resolve a user-typed kind name or alias to its canonical kind
fn canonical_kind(name: &str) -> Result<&'static str> {
    match kinds::registry().get(name) {
        Some(def) => Ok(def.kind()),
        None => {
            let known: Vec<String> = kinds::registry()
                .list()
                .iter()
                .map(|d| d.kind().to_lowercase())
                .collect();
            Err(anyhow!(
                "Unknown resource kind '{}'. Known kinds: {}",
                name,
                known.join(", ")
            ))
        }
    }
}

/// Block until the scope has its first full snapshot
async fn wait_for_sync(handle: &SubscriptionHandle, timeout: Duration) -> Result<()> {
    let mut status_rx = handle.status_changed();
    let wait = async {
        loop {
            if handle.status().sync_complete {
                return Ok(());
            }
            if status_rx.changed().await.is_err() {
                return Err(anyhow!("Synchronizer stopped before the first sync"));
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => {
            let status = handle.status();
            if status.phase == SyncPhase::Error {
                Err(anyhow!("Failed to load {}: no data obtained", handle.scope()))
            } else {
                Err(anyhow!(
                    "Timed out waiting for {} to sync (status: {})",
                    handle.scope(),
                    status.phase
                ))
            }
        }
    }
}

fn format_age(created: Option<DateTime<Utc>>) -> String {
    let Some(created) = created else {
        return "-".to_string();
    };
    let secs = (Utc::now() - created).num_seconds().max(0);
    if secs < 120 {
        format!("{}s", secs)
    } else if secs < 7200 {
        format!("{}m", secs / 60)
    } else if secs < 172_800 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

async fn run_snapshot(
    registry: &Arc<SubscriptionRegistry>,
    backend: &Arc<dyn ClusterBackend>,
    args: &Args,
    config: &config::Config,
    context: &str,
    kind: &str,
    with_metrics: bool,
) -> Result<()> {
    let kind = canonical_kind(kind)?;
    let def = kinds::registry()
        .get(kind)
        .context("kind disappeared from registry")?;
    let namespace = if def.namespaced {
        args.namespace.clone()
    } else {
        None
    };

    let scope = ScopeKey::new(kind, namespace, context);
    let handle = registry.subscribe(scope.clone());
    wait_for_sync(&handle, Duration::from_secs(30)).await?;

    let snapshot = handle.snapshot();

    let metrics = if with_metrics {
        let fetcher = MetricsFetcher::spawn(
            Arc::clone(backend),
            scope,
            None,
            MetricsOptions {
                base_interval: Duration::from_secs(config.metrics_interval_secs),
            },
        );
        // Best-effort: give the first fetch a moment, then join whatever
        // arrived
        for _ in 0..50 {
            if fetcher.last_refresh().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Some(fetcher)
    } else {
        None
    };

    let mut columns = vec!["namespace", "name", "status", "age"];
    if metrics.is_some() {
        columns.push("cpu(m)");
        columns.push("memory(Mi)");
    }
    let mut result = QueryResult::new(&columns);

    for obj in &snapshot {
        let mut row = vec![
            obj.namespace.clone().unwrap_or_else(|| "-".to_string()),
            obj.name.clone(),
            obj.status.to_string(),
            format_age(obj.created_at()),
        ];
        if let Some(fetcher) = &metrics {
            let usage = fetcher.usage_for(obj.namespace.as_deref().unwrap_or(""), &obj.name);
            row.push(
                usage
                    .as_ref()
                    .map(|u| u.cpu_millis.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            );
            row.push(
                usage
                    .as_ref()
                    .map(|u| (u.memory_bytes / (1024 * 1024)).to_string())
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
        result.push_row(row);
    }

    println!("{}", result.format(&args.output, args.no_headers));
    eprintln!("status: {}", handle.status().phase);

    if let Some(fetcher) = metrics {
        fetcher.shutdown();
    }
    handle.unsubscribe();
    Ok(())
}

async fn run_watch(
    registry: &Arc<SubscriptionRegistry>,
    args: &Args,
    context: &str,
    kind: &str,
    duration: Option<u64>,
) -> Result<()> {
    let kind = canonical_kind(kind)?;
    let def = kinds::registry()
        .get(kind)
        .context("kind disappeared from registry")?;
    let namespace = if def.namespaced {
        args.namespace.clone()
    } else {
        None
    };

    let scope = ScopeKey::new(kind, namespace, context);
    let handle = registry.subscribe(scope);

    let mut changed = handle.changed();
    let mut status_rx = handle.status_changed();

    let deadline = tokio::time::sleep(Duration::from_secs(duration.unwrap_or(31_536_000)));
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    eprintln!("Watching {} (Ctrl-C to stop)", handle.scope());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = &mut deadline => break,
            result = changed.changed() => {
                if result.is_err() {
                    break;
                }
                let status = handle.status();
                println!(
                    "[{}] {}  {} objects",
                    Utc::now().format("%H:%M:%S"),
                    status.phase,
                    handle.object_count()
                );
            }
            result = status_rx.changed() => {
                if result.is_err() {
                    break;
                }
                let status = handle.status();
                println!(
                    "[{}] {}  {} objects{}",
                    Utc::now().format("%H:%M:%S"),
                    status.phase,
                    handle.object_count(),
                    if status.sync_complete { "" } else { " (syncing)" }
                );
            }
        }
    }

    handle.unsubscribe();
    Ok(())
}

async fn run_graph(
    backend: &Arc<dyn ClusterBackend>,
    args: &Args,
    context: &str,
    options: &GraphOptions,
    cfg: &FilterConfig,
) -> Result<()> {
    let spinner = progress::create_spinner("Assembling topology...");
    let graph = backend.fetch_topology_graph(context, options).await;
    spinner.finish_and_clear();
    let graph = graph?;

    let display = builder::compute(&graph, cfg);

    // Node names for readable edge endpoints
    let label_of = |id: &str| -> String {
        graph
            .nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| format!("{}/{}", n.kind, n.name))
            .unwrap_or_else(|| id.to_string())
    };

    let mut nodes = QueryResult::new(&[
        "kind", "namespace", "name", "status", "layer", "x", "y", "hidden", "match",
    ]);
    for node in &display.nodes {
        nodes.push_row(vec![
            node.node.kind.clone(),
            node.node.namespace.clone().unwrap_or_else(|| "-".to_string()),
            node.node.name.clone(),
            node.node.status.to_string(),
            node.layer.to_string(),
            format!("{:.0}", node.x),
            format!("{:.0}", node.y),
            if node.hidden_children > 0 {
                format!("+{}", node.hidden_children)
            } else {
                String::new()
            },
            if node.matched { "*".to_string() } else { String::new() },
        ]);
    }
    println!("{}", nodes.format(&args.output, args.no_headers));

    let mut edges = QueryResult::new(&["relation", "from", "to"]);
    for edge in &display.edges {
        edges.push_row(vec![
            edge.relation.to_string(),
            label_of(&edge.from),
            label_of(&edge.to),
        ]);
    }
    println!("{}", edges.format(&args.output, args.no_headers));

    eprintln!(
        "{} nodes, {} edges (payload {} at {})",
        display.nodes.len(),
        display.edges.len(),
        graph.revision,
        graph.generated_at.format("%H:%M:%S"),
    );
    Ok(())
}

async fn run_search(
    backend: &Arc<dyn ClusterBackend>,
    args: &Args,
    context: &str,
    query: &str,
) -> Result<()> {
    // Spotlight looks at everything the cluster has, not the view filters
    let options = GraphOptions {
        include_pods: true,
        include_storage: true,
        include_jobs: true,
        include_replicasets: true,
        include_ingress: true,
    };

    let spinner = progress::create_spinner("Searching...");
    let graph: Result<TopologyGraph, _> = backend.fetch_topology_graph(context, &options).await;
    spinner.finish_and_clear();
    let graph = graph?;

    let hits = spotlight::search(&graph.nodes, query);

    let mut result = QueryResult::new(&["kind", "namespace", "name", "status"]);
    for node in &hits {
        result.push_row(vec![
            node.kind.clone(),
            node.namespace.clone().unwrap_or_else(|| "-".to_string()),
            node.name.clone(),
            node.status.to_string(),
        ]);
    }
    println!("{}", result.format(&args.output, args.no_headers));
    Ok(())
}

async fn run_contexts(pool: &Arc<ClientPool>) -> Result<()> {
    let current = pool.current_context().await;
    for name in pool.list_contexts() {
        if name == current {
            println!("* {}", name);
        } else {
            println!("  {}", name);
        }
    }
    Ok(())
}
