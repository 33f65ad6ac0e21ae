//! Agent Runtime - command line entry point
//!
//! Answers a single query with the configured reasoning strategy.

use std::sync::Arc;

use agent_runtime::agent::{Agent, StrategyKind};
use agent_runtime::config::{parse_criteria, Config};
use agent_runtime::llm::OllamaClient;
use agent_runtime::tools::CapabilityRegistry;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agent-runtime")]
#[command(about = "Answer a query with iterative, chain or branching reasoning")]
struct Cli {
    /// Reasoning strategy: react, cot or tot
    #[arg(long)]
    strategy: Option<StrategyKind>,

    /// Iterative strategy: maximum think/act/observe steps
    #[arg(long)]
    max_steps: Option<usize>,

    /// Upfront-chain strategy: number of reasoning steps
    #[arg(long)]
    thoughts: Option<usize>,

    /// Branching search: candidates per node
    #[arg(long)]
    branches: Option<usize>,

    /// Branching search: tree depth
    #[arg(long)]
    depth: Option<usize>,

    /// Branching search: comma-separated evaluation criteria
    #[arg(long)]
    criteria: Option<String>,

    /// Branching search: concurrent generation calls
    #[arg(long)]
    parallelism: Option<usize>,

    /// Print the run log to stderr
    #[arg(long, default_value_t = false)]
    show_log: bool,

    /// The query to answer
    #[arg(required = true, trailing_var_arg = true)]
    query: Vec<String>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        let settings = &mut config.settings;
        if let Some(n) = self.max_steps {
            settings.max_steps = n;
        }
        if let Some(k) = self.thoughts {
            settings.num_thoughts = k;
        }
        if let Some(b) = self.branches {
            settings.num_branches = b;
        }
        if let Some(d) = self.depth {
            settings.max_depth = d;
        }
        if let Some(criteria) = &self.criteria {
            settings.evaluation_criteria = parse_criteria(criteria);
        }
        if let Some(p) = self.parallelism {
            settings.parallelism = p;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration, flags win over the environment
    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    config.settings.validate()?;
    info!(
        "Loaded configuration: model={}, strategy={}",
        config.llm.model, config.strategy
    );

    let client = OllamaClient::new(&config.llm)?;
    client.check_model().await?;
    let generator = Arc::new(client);
    let registry = Arc::new(CapabilityRegistry::with_builtin(&config.capabilities).await);
    info!("Capabilities: {}", registry.list().await.join(", "));

    let agent = Agent::new(config.strategy, generator, registry, config.settings);
    let query = cli.query.join(" ");
    let outcome = agent.run_logged(&query).await?;

    if cli.show_log {
        for entry in outcome.log.entries() {
            eprintln!("[{}] {:?}: {}", entry.timestamp, entry.entry_type, entry.content);
        }
    }
    println!("{}", outcome.answer);

    Ok(())
}
