//! Multi-agent orchestration engine CLI.
//!
//! Runs one user request per invocation against the configured sandbox
//! directory and prints the event stream to stdout.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use conductor::core::command_parse::{ScannedSpan, scan_commands};
use conductor::core::operations::{OperationKind, bind};
use conductor::events::{Event, TurnStatus};
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use conductor::io::llm::CommandClient;
use conductor::io::preferences::PreferenceStore;
use conductor::logging;
use conductor::orchestrator::{TurnOptions, spawn_turn};
use conductor::session::Session;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Multi-agent orchestration engine for a sandboxed project"
)]
struct Cli {
    /// Config file; relative paths inside it resolve against its directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config and create the sandbox and trash directories.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one request through plan, implementation and critique.
    Run {
        /// The request, as free text.
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
        /// Skip the prompt enhancer.
        #[arg(long)]
        no_enhance: bool,
        /// Run critics without retrying on low grades.
        #[arg(long)]
        no_grading: bool,
    },
    /// Read or change stored preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// Parse agent text from stdin and print the commands it contains, without running them.
    Parse,
}

#[derive(Subcommand)]
enum PrefsAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            request,
            no_enhance,
            no_grading,
        } => cmd_run(&cli.config, &request.join(" "), no_enhance, no_grading),
        Command::Prefs { action } => cmd_prefs(&cli.config, action),
        Command::Parse => cmd_parse(),
    }
}

fn config_base(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn load(path: &Path) -> Result<ConductorConfig> {
    Ok(load_config(path)?.rebase(config_base(path)))
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if force || !path.exists() {
        write_config(path, &ConductorConfig::default())?;
        println!("wrote {}", path.display());
    }
    let config = load(path)?;
    for dir in [config.sandbox_dir.clone(), config.trash_dir()] {
        std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    }
    println!("sandbox: {}", config.sandbox_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(path: &Path, request: &str, no_enhance: bool, no_grading: bool) -> Result<i32> {
    if request.trim().is_empty() {
        return Err(anyhow!("request must not be empty"));
    }
    let config = load(path)?;
    let client = Arc::new(CommandClient::from_config(&config.llm));
    let session = Session::open(config, client)?;
    let defaults = TurnOptions::from_session(&session);
    let options = TurnOptions {
        enhance: defaults.enhance && !no_enhance,
        grading: defaults.grading && !no_grading,
    };

    let (rx, handle) = spawn_turn(session, request.to_string(), options);
    let mut stdout = io::stdout().lock();
    let mut mid_text = false;
    for event in rx {
        match &event {
            Event::AgentTextChunk { .. } => {
                write!(stdout, "{event}").context("write stdout")?;
                mid_text = true;
            }
            _ => {
                if mid_text {
                    writeln!(stdout).context("write stdout")?;
                    mid_text = false;
                }
                writeln!(stdout, "{event}").context("write stdout")?;
            }
        }
        stdout.flush().context("flush stdout")?;
    }
    let (_, outcome) = handle
        .join()
        .map_err(|_| anyhow!("turn worker panicked"))?;

    Ok(match outcome.status {
        TurnStatus::Accepted | TurnStatus::Completed => exit_codes::OK,
        TurnStatus::NotAccepted => exit_codes::NOT_ACCEPTED,
        TurnStatus::Failed => exit_codes::ERROR,
    })
}

fn cmd_prefs(path: &Path, action: PrefsAction) -> Result<i32> {
    let config = load(path)?;
    let store = PreferenceStore::new(&config.preferences_path);
    match action {
        PrefsAction::Get { key } => match store.get(&key)? {
            Some(value) => println!("{value}"),
            None => return Err(anyhow!("preference `{key}` is not set")),
        },
        PrefsAction::Set { key, value } => store.set(&key, &value)?,
        PrefsAction::List => {
            for (key, value) in store.snapshot()? {
                println!("{key} = {value}");
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_parse() -> Result<i32> {
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .context("read stdin")?;
    for line in describe_commands(&text) {
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

/// One line per command span: what would run, what is ignored, what is rejected.
fn describe_commands(text: &str) -> Vec<String> {
    scan_commands(text, OperationKind::is_registered)
        .into_iter()
        .map(|span| match span {
            ScannedSpan::Call { source, call } => match bind(&call) {
                Ok(op) => format!("run {}({})", op.kind().name(), op.change_args().join(", ")),
                Err(err) => format!("reject `{source}`: {err}"),
            },
            ScannedSpan::Ignored { name, .. } => format!("ignore {name}: unknown command"),
            ScannedSpan::SyntaxError { source, error, .. } => format!("reject `{source}`: {error}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["conductor", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_run_joins_words_and_flags() {
        let cli = Cli::parse_from([
            "conductor",
            "--config",
            "alt.toml",
            "run",
            "make",
            "a",
            "game",
            "--no-grading",
        ]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        match cli.command {
            Command::Run {
                request,
                no_enhance,
                no_grading,
            } => {
                assert_eq!(request.join(" "), "make a game");
                assert!(!no_enhance);
                assert!(no_grading);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_request() {
        assert!(Cli::try_parse_from(["conductor", "run"]).is_err());
    }

    #[test]
    fn parse_prefs_set() {
        let cli = Cli::parse_from(["conductor", "prefs", "set", "theme", "dark"]);
        assert!(matches!(
            cli.command,
            Command::Prefs {
                action: PrefsAction::Set { .. }
            }
        ));
    }

    #[test]
    fn describe_lists_runs_ignores_and_rejects() {
        let lines = describe_commands(
            "`create_file('a.py', 'x = 1')` then `launch('x')` and `delete_path(name)`",
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("run create_file(a.py"));
        assert_eq!(lines[1], "ignore launch: unknown command");
        assert!(lines[2].starts_with("reject `delete_path(name)`"));
    }

    #[test]
    fn config_base_defaults_to_cwd() {
        assert_eq!(config_base(Path::new("conductor.toml")), Path::new("."));
        assert_eq!(config_base(Path::new("cfg/conductor.toml")), Path::new("cfg"));
    }
}
