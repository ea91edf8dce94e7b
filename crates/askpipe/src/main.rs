use anyhow::Result;
use askpipe::config::{self, Settings};
use askpipe::render::Renderer;
use askpipe::repl::{self, ChatLine, ReplCommand};
use askpipe_core::{ChatStore, NoopEvent, Orchestrator, SearchProvider, APOLOGY};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

#[derive(Parser, Debug)]
#[command(name = "askpipe")]
#[command(about = "Search-augmented chat: refine, search, extract, stream", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat: one message per line on stdin (`/help` lists commands).
    Chat(ChatCmd),
    /// Answer a single question and exit (exit code 1 if the turn failed).
    Ask(AskCmd),
    /// Diagnose configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug, Clone)]
struct TurnArgs {
    /// Search provider: tavily|openperplex
    #[arg(long, env = "ASKPIPE_SEARCH_PROVIDER", default_value = "tavily")]
    provider: SearchProvider,
    /// Search the web before answering.
    #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    search: bool,
    /// Use the reasoning model and stream its reasoning before the answer.
    #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    reasoning: bool,
    /// Append answering guidelines to the search context.
    #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    guidelines: bool,
}

impl TurnArgs {
    fn settings(&self) -> Settings {
        Settings {
            provider: self.provider,
            search_enabled: self.search,
            reasoning_enabled: self.reasoning,
            answer_guidelines: self.guidelines,
        }
    }
}

#[derive(clap::Args, Debug)]
struct ChatCmd {
    #[command(flatten)]
    turn: TurnArgs,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    #[command(flatten)]
    turn: TurnArgs,
    /// The question (remaining words are joined with spaces).
    #[arg(required = true, trailing_var_arg = true)]
    question: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn init_tracing() {
    // Logs go to stderr; stdout carries only the answer.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn session(settings: &Settings) -> Result<(Orchestrator, Arc<Renderer>, ChatStore)> {
    let orchestrator = config::build_orchestrator(settings)?;
    let renderer = Arc::new(Renderer::stdio());
    let store = ChatStore::new(settings.initial_state()).with_listener(renderer.listener());
    Ok((orchestrator, renderer, store))
}

async fn run_ask(args: AskCmd) -> Result<bool> {
    let question = args.question.join(" ");
    if question.trim().is_empty() {
        anyhow::bail!("question is empty");
    }
    let (orchestrator, renderer, mut store) = session(&args.turn.settings())?;
    store.set_input(question);
    orchestrator.submit(&mut NoopEvent, &mut store).await;
    renderer.end_turn();
    let failed = store
        .state()
        .last_message()
        .is_some_and(|m| m.content == APOLOGY);
    Ok(!failed)
}

async fn run_chat(args: ChatCmd) -> Result<()> {
    let (orchestrator, renderer, mut store) = session(&args.turn.settings())?;
    eprintln!("{}", repl::status_line(&store));
    eprintln!("{}", repl::HELP);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = match repl::read_line(line, &store) {
            ChatLine::Command(ReplCommand::Quit) => break,
            ChatLine::Command(cmd) => {
                let msg = repl::apply(&cmd, &mut store);
                if cmd == ReplCommand::Reset {
                    renderer.reset();
                }
                eprintln!("{msg}");
                continue;
            }
            ChatLine::Message(message) => message,
        };
        store.set_input(message);
        orchestrator.submit(&mut NoopEvent, &mut store).await;
        renderer.end_turn();
        if renderer.out_closed() {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Env file first so it can carry RUST_LOG; it never overrides the process env.
    let env_file = config::load_env_file();
    init_tracing();
    tracing::debug!(env_file = ?env_file, "configuration loaded");

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat(args) => run_chat(args).await?,
        Commands::Ask(args) => {
            if !run_ask(args).await? {
                std::process::exit(1);
            }
        }
        Commands::Doctor(args) => {
            let payload = config::doctor_report(env_file.as_ref());
            let ok = payload["ok"].as_bool().unwrap_or(false);
            match args.output.to_ascii_lowercase().as_str() {
                "text" => {
                    println!("askpipe {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
                    println!(
                        "providers: tavily={} openperplex={}",
                        payload["configured"]["providers"]["tavily"]
                            .as_bool()
                            .unwrap_or(false),
                        payload["configured"]["providers"]["openperplex"]
                            .as_bool()
                            .unwrap_or(false),
                    );
                    println!(
                        "chat: api_key={}",
                        payload["configured"]["chat"]["api_key"]
                            .as_bool()
                            .unwrap_or(false),
                    );
                    println!("checks:");
                    if let Some(arr) = payload["checks"].as_array() {
                        for c in arr {
                            let name = c["name"].as_str().unwrap_or("?");
                            let ok = c["ok"].as_bool().unwrap_or(false);
                            println!("- {}: {}", name, if ok { "ok" } else { "fail" });
                        }
                    }
                }
                _ => println!("{payload}"),
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "askpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("askpipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }
    Ok(())
}
