//! Error types, one enum per pipeline stage.
//!
//! - [`TokenizeError`]: malformed quoting or a construct the grammar refuses
//! - [`ParseError`]: token stream does not fit the grammar
//! - [`ValidationError`]: policy violation (allowlist, containment, feature gate, limit)
//! - [`ExecutionError`]: the OS refused to start a process
//!
//! Timeouts and cancellation are not errors: the executor reports them in
//! [`ExecResult`](crate::exec::ExecResult) as exit codes 124 and 130.

use thiserror::Error;

/// Lexing failure. Every disallowed construct has its own variant so the
/// calling agent can see exactly what to change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("empty command")]
    Empty,

    #[error("unterminated {quote} quote starting at byte {offset}")]
    UnterminatedQuote { quote: &'static str, offset: usize },

    #[error("dangling backslash at end of input")]
    DanglingEscape,

    #[error("backticks are not allowed (command substitution is not supported)")]
    Backtick,

    #[error("newlines are not allowed; use ';' or '&&' to chain commands")]
    Newline,

    #[error("'$(' is not allowed (command substitution is not supported)")]
    CommandSubstitution,

    #[error("'&' is not allowed (background jobs are not supported)")]
    Background,

    #[error("'<<' is not allowed (here-documents are not supported)")]
    HereDoc,

    #[error("'${name}' is not allowed (variable expansion is not supported; single-quote it for a literal '$')")]
    Variable { name: String },

    #[error("'{ch}' is not allowed unquoted (globbing is not supported; quote it or list the files)")]
    Glob { ch: char },

    #[error("tokenizing cancelled")]
    Cancelled,
}

/// Grammar violation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no tokens to parse")]
    NoTokens,

    #[error("missing file operand after '{op}'")]
    MissingOperand { op: String },

    #[error("expected a command {context}, found '{found}'")]
    EmptyCommand { context: String, found: String },

    #[error("expected a command after '{op}' but input ended")]
    UnexpectedEnd { op: String },

    #[error("unexpected token '{token}' after command")]
    TrailingTokens { token: String },

    #[error("malformed quoting in word {word}")]
    BadWord { word: String },

    #[error("parsing cancelled")]
    Cancelled,
}

/// Policy violation found while walking the AST.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("too many commands: {count} exceeds the limit of {limit}")]
    TooManySegments { count: usize, limit: usize },

    #[error("command not allowed: {command} (allowed: {allowed})")]
    CommandNotAllowed { command: String, allowed: String },

    #[error("pipes are disabled: {command} is piped")]
    PipesDisabled { command: String },

    #[error("command chaining is disabled: {command} is part of a sequence")]
    ChainingDisabled { command: String },

    #[error("redirection is disabled: {command} redirects {stream}")]
    RedirectionDisabled { command: String, stream: &'static str },

    #[error("path escapes {base}: {path} (argument of {command})")]
    PathEscape {
        command: String,
        path: String,
        base: String,
    },

    #[error("redirection target escapes {base}: {path} (on {command})")]
    RedirectEscape {
        command: String,
        path: String,
        base: String,
    },

    #[error("working directory {cwd} is outside {base}")]
    CwdEscape { cwd: String, base: String },

    #[error("validation cancelled")]
    Cancelled,
}

/// Failure to start a process. Only genuine OS-level faults end up here.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up pipe for {command}: {source}")]
    Pipe {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Any failure along tokenize → parse → validate → execute.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl ShellError {
    /// Stage label used in CLI output and logs.
    pub fn stage(&self) -> &'static str {
        match self {
            ShellError::Tokenize(_) => "tokenize",
            ShellError::Parse(_) => "parse",
            ShellError::Validation(_) => "validate",
            ShellError::Execution(_) => "execute",
        }
    }
}
