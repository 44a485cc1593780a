use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use podline_core::PodSnapshot;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "podlinectl", version, about = "Pod STATUS labels from manifests")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human, env = "PODLINE_OUTPUT")]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the STATUS of every pod in the given manifests
    Status {
        /// Pod/List manifests (JSON or YAML); `-` reads stdin
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the STATUS and the rule that produced it
    Explain {
        /// Pod/List manifests (JSON or YAML); `-` reads stdin
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(serde::Serialize)]
struct Row {
    pod: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<&'static str>,
}

fn init_tracing() {
    let env = std::env::var("PODLINE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries results; logs go to stderr
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load(path: &Path) -> Result<Vec<PodSnapshot>> {
    let text = read_source(path)?;
    podline_kubehub::load_manifests(&text).with_context(|| format!("loading {}", path.display()))
}

fn row(pod: &PodSnapshot, with_rule: bool) -> Row {
    let res = podline_core::explain(pod);
    debug!(pod = %pod.key(), status = %res.status, rule = res.rule.as_str(), "resolved");
    Row { pod: pod.key(), status: res.status, rule: with_rule.then(|| res.rule.as_str()) }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let (files, with_rule) = match cli.command {
        Commands::Status { files } => (files, false),
        Commands::Explain { files } => (files, true),
    };
    info!(files = files.len(), explain = with_rule, "resolving pod status");

    let mut rows = Vec::new();
    let mut failed = 0usize;
    for path in files.iter() {
        match load(path) {
            Ok(pods) => rows.extend(pods.iter().map(|p| row(p, with_rule))),
            Err(e) => {
                failed += 1;
                error!(file = %path.display(), error = ?e, "load failed");
                eprintln!("error: {:#}", e);
            }
        }
    }

    match cli.output {
        Output::Human => {
            for r in rows.iter() {
                match r.rule {
                    Some(rule) => println!("{}\t{}\t({})", r.pod, r.status, rule),
                    None => println!("{}\t{}", r.pod, r.status),
                }
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} inputs failed to load", failed, files.len()));
    }
    Ok(())
}
