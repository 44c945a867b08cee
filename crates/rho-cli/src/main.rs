//! rho - chat with an OpenAI-style endpoint from the terminal

mod config;

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use rho_ai::{ClientConfig, Credential, HttpTransport, RequestParameters};
use rho_chat::{ChatSession, TurnReport, UserTurnPolicy};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::Config;

/// rho - terminal chat client
#[derive(Parser, Debug)]
#[command(name = "rho")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Send this prompt, print the reply and exit
    prompt: Option<String>,

    /// Same as PROMPT
    #[arg(short = 'c', long, conflicts_with = "prompt")]
    command: Option<String>,

    /// Model identifier (default: gpt-3.5-turbo)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum tokens to generate
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(long)]
    temperature: Option<f32>,

    /// Nucleus-sampling cutoff (0.0 - 1.0)
    #[arg(long)]
    top_p: Option<f32>,

    /// Wait for the complete reply instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// File containing the API key
    #[arg(long)]
    api_key_file: Option<PathBuf>,

    /// Endpoint root (default: https://api.openai.com/v1)
    #[arg(long)]
    base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Keep your message in the history even if the reply fails
    #[arg(long)]
    record_failed_turns: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

impl Args {
    fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref().or(self.command.as_deref())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = Config::load();
    let mut session = build_session(&args, &cfg)?;

    let interrupts = Interrupts::default();
    let listener = interrupts.listen();

    let result = match args.prompt() {
        Some(prompt) => run_command(&mut session, prompt, &interrupts).await,
        None => run_interactive(&mut session, &interrupts, &mut io::stdin().lock()).await,
    };

    listener.abort();
    result
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,rho=debug,rho_ai=debug,rho_chat=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Merge CLI flags over the config file over built-in defaults
fn request_parameters(args: &Args, cfg: &Config) -> RequestParameters {
    let defaults = RequestParameters::default();
    RequestParameters {
        model: args
            .model
            .clone()
            .or_else(|| cfg.model.clone())
            .unwrap_or(defaults.model),
        max_tokens: args
            .max_tokens
            .or(cfg.max_tokens)
            .unwrap_or(defaults.max_tokens),
        temperature: args
            .temperature
            .or(cfg.temperature)
            .unwrap_or(defaults.temperature),
        top_p: args.top_p.or(cfg.top_p).unwrap_or(defaults.top_p),
        stream: !args.no_stream && cfg.stream.unwrap_or(defaults.stream),
    }
}

fn user_turn_policy(args: &Args, cfg: &Config) -> UserTurnPolicy {
    if args.record_failed_turns {
        UserTurnPolicy::OnDispatch
    } else {
        cfg.user_turn_policy.unwrap_or_default()
    }
}

fn client_config(args: &Args, cfg: &Config, credential: Credential) -> ClientConfig {
    let mut client = ClientConfig::new(credential);
    if let Some(base_url) = args.base_url.clone().or_else(|| cfg.base_url.clone()) {
        client = client.with_base_url(base_url);
    }
    if let Some(secs) = args.timeout.or(cfg.timeout_secs) {
        client = client.with_timeout(Duration::from_secs(secs));
    }
    client
}

/// Everything that can fail before the first network call
fn build_session(args: &Args, cfg: &Config) -> anyhow::Result<ChatSession> {
    let params = request_parameters(args, cfg);
    params.validate().context("invalid generation parameters")?;

    if args.timeout.or(cfg.timeout_secs) == Some(0) {
        anyhow::bail!("timeout must be at least one second");
    }

    let credential =
        Credential::resolve(args.api_key_file.as_deref(), cfg.api_key_file.as_deref())?;
    let transport = HttpTransport::new(client_config(args, cfg, credential))?;
    tracing::debug!(
        endpoint = %transport.config().endpoint(),
        model = %params.model,
        stream = params.stream,
        "session configured"
    );

    Ok(ChatSession::new(Arc::new(transport), params).with_policy(user_turn_policy(args, cfg)))
}

/// Routes Ctrl-C to the turn in flight, or exits when idle at the prompt
#[derive(Clone, Default)]
struct Interrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    fn listen(&self) -> tokio::task::JoinHandle<()> {
        let current = self.current.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                match current.lock().as_ref() {
                    Some(cancel) => {
                        tracing::debug!("interrupt received; cancelling turn");
                        cancel.cancel();
                    }
                    None => {
                        eprintln!();
                        std::process::exit(130);
                    }
                }
            }
        })
    }

    fn begin_turn(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        *self.current.lock() = Some(cancel.clone());
        cancel
    }

    fn end_turn(&self) {
        *self.current.lock() = None;
    }
}

/// Run one turn, printing fragments as they arrive
async fn run_turn(
    session: &mut ChatSession,
    input: &str,
    interrupts: &Interrupts,
) -> rho_chat::Result<TurnReport> {
    let cancel = interrupts.begin_turn();
    let mut stdout = io::stdout();
    let mut printed = false;

    let result = session
        .send_turn(
            input,
            |fragment| {
                print!("{}", fragment.text);
                stdout.flush().ok();
                printed = true;
            },
            &cancel,
        )
        .await;
    interrupts.end_turn();

    if printed || result.is_ok() {
        println!();
    }
    if let Ok(report) = &result {
        if report.finish_reason.as_deref() == Some("length") {
            tracing::warn!("reply was cut off by the max_tokens limit");
        }
    }
    result
}

async fn run_command(
    session: &mut ChatSession,
    prompt: &str,
    interrupts: &Interrupts,
) -> anyhow::Result<()> {
    run_turn(session, prompt, interrupts).await?;
    Ok(())
}

/// One read from the prompt
#[derive(Debug, PartialEq, Eq)]
enum PromptInput {
    Line(String),
    Blank,
    Exit,
    Eof,
}

fn read_input<R: BufRead>(reader: &mut R) -> io::Result<PromptInput> {
    let mut input = String::new();
    if reader.read_line(&mut input)? == 0 {
        return Ok(PromptInput::Eof);
    }
    Ok(match input.trim() {
        "" => PromptInput::Blank,
        "exit" => PromptInput::Exit,
        line => PromptInput::Line(line.to_string()),
    })
}

async fn run_interactive<R: BufRead>(
    session: &mut ChatSession,
    interrupts: &Interrupts,
    input: &mut R,
) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::stderr().is_terminal() {
        eprintln!("rho ({})", session.params().model);
        eprintln!("Type 'exit' to quit.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = match read_input(input)? {
            PromptInput::Line(line) => line,
            PromptInput::Blank => continue,
            PromptInput::Exit => break,
            PromptInput::Eof => {
                println!();
                break;
            }
        };

        if let Err(e) = run_turn(session, &line, interrupts).await {
            if e.is_fatal() {
                return Err(e.into());
            }
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}
