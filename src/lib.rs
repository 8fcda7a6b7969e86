//! cc-safeshell: a sandboxed shell for commands proposed by a coding agent.
//!
//! A command line goes through four stages, each with its own error type:
//! it is tokenized under a deliberately small grammar, parsed into a typed
//! AST, validated against an allowlist and a containment root, and finally
//! run as real processes with a timeout, a cancellation token and a cap on
//! captured output. No shell interpreter is ever involved.
//!
//! # Architecture
//!
//! - **[`parse`]**: Tokenizer, recursive-descent parser, AST types.
//! - **[`eval`]**: Validator: allowlist, feature gates, segment limit, path containment.
//! - **[`exec`]**: Executor: pipelines, connectors, timeout and cancellation.
//! - **[`config`]**: Configuration loading: embedded defaults + user overlay merge.
//! - **[`logging`]**: File logging to `~/.local/share/cc-safeshell/`.
//! - **[`error`]**: One error enum per stage plus [`ShellError`].

/// Configuration types, loading, and overlay merge logic.
pub mod config;
/// Error types for every stage.
pub mod error;
/// Validation: allowlist, feature gates, limits, path containment.
pub mod eval;
/// Process execution of a validated AST.
pub mod exec;
/// File-based logging.
pub mod logging;
/// Shell command parsing: tokenizer, parser, AST types.
pub mod parse;

pub use error::{ExecutionError, ParseError, ShellError, TokenizeError, ValidationError};
pub use eval::{ValidationContext, validate};
pub use exec::{ExecOptions, ExecResult, execute};
pub use parse::{parse, tokenize};

/// Tokenize, parse, validate and execute `command` in one call.
///
/// The abort token in `opts`, if any, also cancels the front-end stages.
pub async fn run(command: &str, ctx: &ValidationContext, opts: &ExecOptions) -> Result<ExecResult, ShellError> {
    let cancel = opts.abort.as_ref();
    let tokens = tokenize(command, cancel)?;
    let ast = parse(&tokens, cancel)?;
    validate(&ast, ctx, cancel)?;
    log::debug!("running {} command(s): {command}", ast.command_count());
    Ok(execute(&ast, opts).await?)
}
