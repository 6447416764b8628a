// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "k8map")]
#[command(
    author,
    version,
    about = "Live resource cache and topology graph engine for Kubernetes clusters"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Kubernetes context to use (defaults to the saved selection, then
    /// the kubeconfig current context)
    #[arg(short, long, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Restrict namespaced scopes to one namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Omit column headers in output
    #[arg(long)]
    pub no_headers: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a synced snapshot of one resource kind
    Snapshot {
        /// Resource kind (e.g. pods, deploy, Service)
        kind: String,

        /// Join usage metrics into the snapshot
        #[arg(long)]
        with_metrics: bool,
    },

    /// Follow one resource kind and print live sync updates
    Watch {
        /// Resource kind (e.g. pods, deploy, Service)
        kind: String,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Fetch the cluster topology and print the laid-out graph
    Graph {
        /// Include pods
        #[arg(long)]
        pods: bool,

        /// Include persistent volumes and claims
        #[arg(long)]
        storage: bool,

        /// Include jobs and cronjobs
        #[arg(long)]
        jobs: bool,

        /// Include replicasets
        #[arg(long)]
        replicasets: bool,

        /// Exclude ingresses
        #[arg(long)]
        no_ingress: bool,

        /// Highlight nodes matching this text
        #[arg(short, long)]
        search: Option<String>,

        /// Drop nodes that do not match the search
        #[arg(long)]
        hide_non_matches: bool,

        /// Collapse controller-owned objects into their controller
        #[arg(long)]
        collapse: bool,

        /// Controller ids to keep expanded while collapsing
        #[arg(long)]
        expand: Vec<String>,

        /// Kinds to hide from the graph
        #[arg(long)]
        hide_kind: Vec<String>,
    },

    /// Search every known topology node, ignoring graph filters
    Search {
        /// Free-text query matched against name, kind, and namespace
        query: String,
    },

    /// List available kubeconfig contexts
    Contexts,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}
