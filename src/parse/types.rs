//! Types produced by the tokenizer and parser, consumed by the validator and executor.

use serde::Serialize;

/// Lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Word,
    Op,
}

/// A single lexeme. Word values still carry their quote marks and escapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
}

impl Token {
    pub fn word(value: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Word,
            value: value.into(),
        }
    }

    pub fn op(value: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Op,
            value: value.into(),
        }
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.value == op
    }
}

/// Control operator separating consecutive pipelines of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Connector {
    /// `&&`: run next only if previous succeeded
    And,
    /// `||`: run next only if previous failed
    Or,
    /// `;`: run next unconditionally
    Semi,
}

impl Connector {
    /// The connector's shell syntax.
    pub fn as_str(&self) -> &'static str {
        match self {
            Connector::And => "&&",
            Connector::Or => "||",
            Connector::Semi => ";",
        }
    }

    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "&&" => Some(Connector::And),
            "||" => Some(Connector::Or),
            ";" => Some(Connector::Semi),
            _ => None,
        }
    }

    /// Whether the next pipeline runs, given the code the sequence carries so far.
    pub fn should_run(&self, previous_code: i32) -> bool {
        match self {
            Connector::And => previous_code == 0,
            Connector::Or => previous_code != 0,
            Connector::Semi => true,
        }
    }
}

/// Output redirection to a file, truncating or appending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRedirect {
    pub path: String,
    pub append: bool,
}

/// File redirections attached to one command.
///
/// stdout and stderr are each a single direction: a later redirection of the
/// same stream replaces an earlier one. `2>&1` counts as a stderr direction,
/// so `2>&1` and `2> file` cancel each other depending on order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Redirections {
    pub stdin_file: Option<String>,
    pub stdout_file: Option<FileRedirect>,
    pub stderr_file: Option<FileRedirect>,
    pub merge_stderr_to_stdout: bool,
}

impl Redirections {
    pub fn is_empty(&self) -> bool {
        self.stdin_file.is_none()
            && self.stdout_file.is_none()
            && self.stderr_file.is_none()
            && !self.merge_stderr_to_stdout
    }

    /// Name of the first redirected stream, for error messages.
    pub fn first_stream(&self) -> Option<&'static str> {
        if self.stdin_file.is_some() {
            Some("stdin")
        } else if self.stdout_file.is_some() {
            Some("stdout")
        } else if self.stderr_file.is_some() || self.merge_stderr_to_stdout {
            Some("stderr")
        } else {
            None
        }
    }

    /// Every file path this command opens.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.stdin_file
            .as_deref()
            .into_iter()
            .chain(self.stdout_file.as_ref().map(|r| r.path.as_str()))
            .chain(self.stderr_file.as_ref().map(|r| r.path.as_str()))
    }
}

/// One simple command: unquoted argv plus its redirections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandNode {
    pub argv: Vec<String>,
    pub redirs: Redirections,
}

impl CommandNode {
    /// The program name (`argv[0]`).
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    /// Shell-quoted rendering for logs and messages.
    pub fn display(&self) -> String {
        shlex::try_join(self.argv.iter().map(String::as_str))
            .unwrap_or_else(|_| self.argv.join(" "))
    }
}

/// Commands joined by `|`; `commands[i]` stdout feeds `commands[i + 1]` stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineNode {
    pub commands: Vec<CommandNode>,
}

/// Pipelines joined by connectors. `connectors.len() == items.len() - 1`.
///
/// For `a | b && c`, there are two items (`a | b`, `c`) and one connector (`&&`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceNode {
    pub items: Vec<PipelineNode>,
    pub connectors: Vec<Connector>,
}

impl SequenceNode {
    /// Total number of commands across every pipeline.
    pub fn command_count(&self) -> usize {
        self.items.iter().map(|p| p.commands.len()).sum()
    }
}
