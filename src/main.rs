//! cc-safeshell: run one agent-proposed command inside the sandbox.
//!
//! Reads a JSON request from stdin, writes a JSON response to stdout.
//!
//! Request:  `{"command": "...", "cwd": "...", "timeout_ms": 5000}`
//! Response: `{"stdout", "stderr", "code", "signal", "truncated"}`, or
//!           `{"error": {"stage", "message"}}` with exit status 2.
//!
//! Flags:
//!   --check        tokenize, parse and validate only
//!   --parse        print the parsed AST
//!   --dump-config  print the merged configuration as TOML

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use cc_safeshell::config::Config;
use cc_safeshell::parse::SequenceNode;
use cc_safeshell::{ShellError, ValidationContext, logging, parse, tokenize, validate};

const USAGE: &str = "usage: cc-safeshell [--check | --parse | --dump-config] < request.json";

/// Exit status for a command refused by one of the stages.
const EXIT_REJECTED: u8 = 2;

// ─── Types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Check,
    Parse,
    DumpConfig,
}

#[derive(Debug, Deserialize)]
struct Request {
    command: String,
    cwd: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    stage: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl From<&ShellError> for ErrorResponse {
    fn from(e: &ShellError) -> Self {
        Self {
            error: ErrorBody {
                stage: e.stage(),
                message: e.to_string(),
            },
        }
    }
}

// ─── Arguments and input ─────────────────────────────

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Mode, String> {
    let mut mode = Mode::Run;
    for arg in args {
        let next = match arg.as_str() {
            "--check" => Mode::Check,
            "--parse" => Mode::Parse,
            "--dump-config" => Mode::DumpConfig,
            other => return Err(format!("unknown argument: {other}")),
        };
        if mode != Mode::Run {
            return Err("only one mode flag may be given".into());
        }
        mode = next;
    }
    Ok(mode)
}

fn read_request(input: &str) -> Result<Request, String> {
    let request: Request = serde_json::from_str(input).map_err(|e| format!("JSON parse error: {e}"))?;
    if request.command.trim().is_empty() {
        return Err("request has an empty command".into());
    }
    Ok(request)
}

/// Request cwd, made absolute against the launch directory.
fn working_dir(launch_dir: &Path, requested: Option<&Path>) -> PathBuf {
    match requested {
        Some(dir) => launch_dir.join(dir),
        None => launch_dir.to_path_buf(),
    }
}

// ─── Output ──────────────────────────────────────────

fn emit<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to encode response: {e}");
            ExitCode::FAILURE
        }
    }
}

fn reject(e: &ShellError) -> ExitCode {
    log::info!("rejected at {}: {e}", e.stage());
    let _ = emit(&ErrorResponse::from(e));
    ExitCode::from(EXIT_REJECTED)
}

// ─── Modes ───────────────────────────────────────────

/// Tokenize and parse, and validate too when a context is given.
fn front_end(command: &str, ctx: Option<&ValidationContext>) -> Result<SequenceNode, ShellError> {
    let tokens = tokenize(command, None)?;
    let ast = parse(&tokens, None)?;
    if let Some(ctx) = ctx {
        validate(&ast, ctx, None)?;
    }
    Ok(ast)
}

async fn run_command(config: &Config, request: &Request, launch_dir: &Path, cwd: &Path) -> ExitCode {
    let ctx = config.validation_context(launch_dir, cwd);
    let token = CancellationToken::new();
    let mut opts = config.exec_options(cwd).with_abort(token.clone());
    if let Some(ms) = request.timeout_ms {
        opts.timeout = Duration::from_millis(ms);
    }

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
    let outcome = cc_safeshell::run(&request.command, &ctx, &opts).await;
    interrupt.abort();

    logging::log_outcome(&request.command, &outcome);
    match &outcome {
        Ok(result) => emit(result),
        Err(e) => reject(e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let mode = match parse_args(std::env::args().skip(1)) {
        Ok(mode) => mode,
        Err(msg) => {
            eprintln!("{msg}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config::load();
    if mode == Mode::DumpConfig {
        return match toml::to_string_pretty(&config) {
            Ok(dumped) => {
                print!("{dumped}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to serialize config: {e}");
                ExitCode::FAILURE
            }
        };
    }
    logging::init(config.log_level());

    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        eprintln!("failed to read stdin");
        return ExitCode::FAILURE;
    }
    let request = match read_request(&input) {
        Ok(request) => request,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    // The root comes from config or from here, never from the request.
    let launch_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("cannot determine working directory: {e}");
            return ExitCode::FAILURE;
        }
    };
    let cwd = working_dir(&launch_dir, request.cwd.as_deref());

    match mode {
        Mode::Run => run_command(&config, &request, &launch_dir, &cwd).await,
        Mode::Check => match front_end(&request.command, Some(&config.validation_context(&launch_dir, &cwd))) {
            Ok(_) => emit(&serde_json::json!({ "ok": true })),
            Err(e) => reject(&e),
        },
        Mode::Parse => match front_end(&request.command, None) {
            Ok(ast) => emit(&ast),
            Err(e) => reject(&e),
        },
        Mode::DumpConfig => ExitCode::SUCCESS,
    }
}

// ─── Tests ───────────────────────────────────────────
