//! Drive a treeloom session from the command line.
//!
//! Session state lives under `--state-dir` as two JSON documents per session.
//! The API key for summarization is read from `TREELOOM_API_KEY`, falling
//! back to `OPENROUTER_KEY`.
//!
//! # Examples
//!
//! ```sh
//! treeloom instruct --session report --text "Write a market report"
//! id=$(treeloom push --session report --name writer --input "draft the report")
//! treeloom note --session report --id "$id" --text "collecting sources"
//! treeloom render --session report --agent-id "$id" --agent-name writer \
//!   --task "draft the report" --transcript actions.json
//! treeloom compress --transcript actions.json --budget 100000 --offline
//! treeloom pop --session report --id "$id" --output "report drafted"
//! treeloom count --file actions.json --heuristic
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use treeloom::api::{ChatClient, DisabledSummarizer, Summarizer};
use treeloom::config::Config;
use treeloom::context::{
    ActionRecord, Compressor, ContextRenderer, CurrentInvocation, HeuristicCounter, TokenCounter,
    default_counter,
};
use treeloom::hierarchy::{HierarchyStore, SessionRegistry};
use treeloom::storage::FileDocumentStore;

/// Track nested agent invocations and assemble bounded context documents.
#[derive(Parser)]
#[command(name = "treeloom", version)]
struct Cli {
    /// Directory holding session documents
    #[arg(long, global = true, default_value = ".agents/sessions")]
    state_dir: PathBuf,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a top-level instruction and print its id
    Instruct {
        #[arg(long)]
        session: String,
        #[arg(long)]
        text: String,
    },
    /// Push an invocation frame and print its agent id
    Push {
        #[arg(long)]
        session: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        input: String,
    },
    /// Complete an invocation
    Pop {
        #[arg(long)]
        session: String,
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        output: String,
    },
    /// Replace the progress note of a running invocation
    Note {
        #[arg(long)]
        session: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        text: String,
    },
    /// Print the id of the top stack frame
    Top {
        #[arg(long)]
        session: String,
    },
    /// Print the session's current partition and history as JSON
    Snapshot {
        #[arg(long)]
        session: String,
    },
    /// Render the context document for an invocation
    Render {
        #[arg(long)]
        session: String,
        #[arg(long)]
        agent_id: Option<String>,
        #[arg(long)]
        agent_name: String,
        #[arg(long)]
        task: String,
        /// File with the persona / system text
        #[arg(long)]
        persona_file: Option<PathBuf>,
        /// JSON array of actions
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    /// Bound a transcript to a token budget and print the result as JSON
    Compress {
        /// JSON array of actions
        #[arg(long)]
        transcript: PathBuf,
        /// Window budget in tokens
        #[arg(long)]
        budget: usize,
        /// Skip the summarization model and use excerpts only
        #[arg(long)]
        offline: bool,
    },
    /// Count tokens of a file, or stdin when no file is given
    Count {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Use the character-class estimate instead of the tokenizer
        #[arg(long)]
        heuristic: bool,
    },
}

fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))
}

fn read_transcript(path: &Path) -> Result<Vec<ActionRecord>, String> {
    let text = read_file(path)?;
    serde_json::from_str(&text)
        .map_err(|e| format!("invalid transcript {}: {e}", path.display()))
}

fn open_registry(cli: &Cli, config: &Config) -> Result<SessionRegistry, String> {
    let backend = FileDocumentStore::new(&cli.state_dir).map_err(|e| e.to_string())?;
    Ok(SessionRegistry::new(Arc::new(backend), config.store.clone()))
}

/// Run `op` against one session, flushing any changes before returning.
fn with_session<F>(cli: &Cli, config: &Config, session: &str, op: F) -> Result<String, String>
where
    F: FnOnce(&HierarchyStore) -> Result<String, String>,
{
    let registry = open_registry(cli, config)?;
    let store = registry.open(session);
    let output = op(store.as_ref())?;
    if store.is_dirty() {
        store.flush().map_err(|e| e.to_string())?;
    }
    Ok(output)
}

fn summarizer(config: &Config, offline: bool) -> Result<Arc<dyn Summarizer>, String> {
    if offline {
        return Ok(Arc::new(DisabledSummarizer));
    }
    let client = ChatClient::from_env(config.llm.clone())
        .map_err(|e| format!("{e} (pass --offline to compress without a model)"))?;
    Ok(Arc::new(client))
}

fn run(cli: &Cli) -> Result<String, String> {
    let config = Config::load_or_default(cli.config.as_deref())?;

    match &cli.command {
        Command::Instruct { session, text } => {
            with_session(cli, &config, session, |store| Ok(store.register_instruction(text)))
        }
        Command::Push {
            session,
            name,
            input,
        } => with_session(cli, &config, session, |store| Ok(store.push_frame(name, input))),
        Command::Pop {
            session,
            id,
            output,
        } => with_session(cli, &config, session, |store| {
            store.pop_frame(id, output);
            Ok(String::new())
        }),
        Command::Note { session, id, text } => with_session(cli, &config, session, |store| {
            store.update_thinking(id, text);
            Ok(String::new())
        }),
        Command::Top { session } => with_session(cli, &config, session, |store| {
            Ok(store.current_top().unwrap_or_default())
        }),
        Command::Snapshot { session } => with_session(cli, &config, session, |store| {
            serde_json::to_string_pretty(&store.snapshot())
                .map_err(|e| format!("failed to serialize snapshot: {e}"))
        }),
        Command::Render {
            session,
            agent_id,
            agent_name,
            task,
            persona_file,
            transcript,
        } => {
            let persona = match persona_file {
                Some(path) => read_file(path)?,
                None => String::new(),
            };
            let transcript = match transcript {
                Some(path) => read_transcript(path)?,
                None => Vec::new(),
            };
            let mut current = CurrentInvocation::new(agent_name, task);
            current.agent_id = agent_id.clone();
            let renderer = ContextRenderer::new(config.renderer.clone());
            with_session(cli, &config, session, |store| {
                Ok(renderer.render(&store.snapshot(), &transcript, &persona, &current))
            })
        }
        Command::Compress {
            transcript,
            budget,
            offline,
        } => {
            let actions = read_transcript(transcript)?;
            let compressor = Compressor::new(
                summarizer(&config, *offline)?,
                default_counter(),
                config.compression.clone(),
            );
            let report = compressor.compress_with_report(&actions, *budget);
            serde_json::to_string_pretty(&report.transcript)
                .map_err(|e| format!("failed to serialize transcript: {e}"))
        }
        Command::Count { file, heuristic } => {
            let text = match file {
                Some(path) => read_file(path)?,
                None => {
                    let mut buf = String::new();
                    io::stdin()
                        .read_to_string(&mut buf)
                        .map_err(|e| format!("failed to read stdin: {e}"))?;
                    buf
                }
            };
            let counter: Arc<dyn TokenCounter> = if *heuristic {
                Arc::new(HeuristicCounter)
            } else {
                default_counter()
            };
            Ok(counter.count(&text).to_string())
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) if output.is_empty() => {}
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
