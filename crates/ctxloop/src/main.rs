//! Run, resume, and inspect checkpointed agent conversations.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Start a conversation
//! ctxloop run --prompt "Plan a migration from MySQL to Postgres" --max-loops 20
//!
//! # With a system prompt and a JSON config file
//! ctxloop run --system "You are a database expert." \
//!   --prompt "Review this schema." --config loop.json
//!
//! # Continue after a crash
//! ctxloop resume --context-id ctx-3f2a...
//!
//! # See what is on disk
//! ctxloop list
//! ```

use clap::{ArgAction, Parser, Subcommand};
use ctxloop::api::openrouter::DEFAULT_MODEL;
use ctxloop::prelude::*;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run, resume, and inspect checkpointed agent conversations.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "ctxloop")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory holding per-conversation checkpoints
    #[arg(long, global = true, default_value = ".ctxloop/checkpoints")]
    checkpoint_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new conversation
    Run {
        /// The task for the agent
        #[arg(long)]
        prompt: String,

        /// System prompt
        #[arg(long)]
        system: Option<String>,

        #[command(flatten)]
        model: ModelArgs,

        /// Override the loop ceiling from the config
        #[arg(long)]
        max_loops: Option<u32>,
    },
    /// Continue a conversation from its last checkpoint
    Resume {
        /// Id printed when the conversation started
        #[arg(long)]
        context_id: String,

        #[command(flatten)]
        model: ModelArgs,
    },
    /// List checkpointed conversations
    List,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Model to use for completions
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Path to a JSON loop config (missing fields take defaults)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ModelArgs {
    fn load_config(&self) -> Result<LoopConfig, Box<dyn std::error::Error>> {
        Ok(match &self.config {
            Some(path) => LoopConfig::load_json(path)?,
            None => LoopConfig::default(),
        })
    }

    fn client(&self) -> Result<Arc<OpenRouterClient>, Box<dyn std::error::Error>> {
        let api_key = std::env::var("OPENROUTER_KEY")
            .map_err(|_| "OPENROUTER_KEY environment variable is not set")?;
        Ok(Arc::new(
            OpenRouterClient::new(api_key)?.with_model(&self.model),
        ))
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::WARN,
        (false, 0) => LevelFilter::INFO,
        (false, 1) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(level)
        .init();
}

fn base_tools() -> ToolSet {
    ToolSet::new().with(ThinkTool).with(TodoTool)
}

/// Drive one run or resume and print the final answer.
async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileCheckpointStore::new(&cli.checkpoint_dir)?;

    let (model_args, start, max_loops) = match cli.command {
        Command::List => return list(&store),
        Command::Run {
            prompt,
            system,
            model,
            max_loops,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(Message::system(system));
            }
            messages.push(Message::human(prompt));
            (model, Start::New(messages), max_loops)
        }
        Command::Resume { context_id, model } => (model, Start::Resume(context_id), None),
    };

    let mut config = model_args.load_config()?;
    if let Some(max_loops) = max_loops {
        config = config.with_max_loop_count(max_loops);
    }
    let client = model_args.client()?;

    let isolator = SubagentIsolator::new(client.clone(), base_tools, config.clone());
    let tools = base_tools().with_if(isolator.can_delegate(), DelegateTool::new(isolator.clone()));
    let controller = LoopController::new(client.as_ref(), &tools, config)
        .with_checkpoint_store(&store)
        .with_event_handler(&LoggingHandler);

    let result = match start {
        Start::New(messages) => {
            let state = controller.new_state(messages);
            eprintln!("ctxloop: context {}", state.context_id);
            controller.run(state).await?
        }
        Start::Resume(context_id) => controller.resume(&context_id).await?,
    };

    eprintln!(
        "ctxloop: {} after {} loop(s), {} compression(s), {} tokens",
        result.termination,
        result.loop_count(),
        result.compressions,
        result.total_tokens()
    );
    println!("{}", result.final_text);
    Ok(())
}

enum Start {
    New(Vec<Message>),
    Resume(String),
}

fn list(store: &FileCheckpointStore) -> Result<(), Box<dyn std::error::Error>> {
    let contexts = store.list_contexts()?;
    if contexts.is_empty() {
        println!("No checkpointed conversations in {}", store.dir().display());
        return Ok(());
    }
    for m in contexts {
        let status = if m.is_finished() { "finished" } else { "resumable" };
        println!(
            "{}  {}  loops={} messages={} tokens={}  next={}  {}",
            m.context_id,
            m.updated_at.format("%Y-%m-%d %H:%M"),
            m.loop_count,
            m.message_count,
            m.lifetime_prompt_tokens + m.lifetime_completion_tokens,
            m.next_phase,
            status,
        );
        if !m.message_preview.is_empty() {
            println!("    {}", m.message_preview);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = execute(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
