use tokio_util::sync::CancellationToken;

use super::tokenize::unquote;
use super::types::{
    CommandNode, Connector, FileRedirect, PipelineNode, Redirections, SequenceNode, Token,
    TokenKind,
};
use crate::error::ParseError;

/// Parse a token stream into a [`SequenceNode`].
///
/// Grammar:
/// ```text
/// sequence    := pipeline (connector pipeline)*
/// pipeline    := command ('|' command)*
/// command     := WORD+ redirection*
/// redirection := ('<'|'>'|'>>'|'2>'|'2>>'|'2>&1') WORD?   // 2>&1 takes no operand
/// ```
pub fn parse(tokens: &[Token], cancel: Option<&CancellationToken>) -> Result<SequenceNode, ParseError> {
    if tokens.is_empty() {
        return Err(ParseError::NoTokens);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        cancel,
    };
    let sequence = parser.sequence()?;
    if let Some(tok) = parser.peek() {
        return Err(ParseError::TrailingTokens {
            token: tok.value.clone(),
        });
    }
    Ok(sequence)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check_cancel(&self) -> Result<(), ParseError> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ParseError::Cancelled);
        }
        Ok(())
    }

    fn sequence(&mut self) -> Result<SequenceNode, ParseError> {
        let mut items = vec![self.pipeline(None)?];
        let mut connectors = Vec::new();

        while let Some(tok) = self.peek() {
            let Some(connector) = (tok.kind == TokenKind::Op)
                .then(|| Connector::from_op(&tok.value))
                .flatten()
            else {
                break;
            };
            self.pos += 1;
            connectors.push(connector);
            items.push(self.pipeline(Some(connector.as_str()))?);
        }

        Ok(SequenceNode { items, connectors })
    }

    /// `after` is the operator that introduced this pipeline, for messages.
    fn pipeline(&mut self, after: Option<&str>) -> Result<PipelineNode, ParseError> {
        let mut commands = vec![self.command(after)?];
        while self.peek().is_some_and(|t| t.is_op("|")) {
            self.pos += 1;
            commands.push(self.command(Some("|"))?);
        }
        Ok(PipelineNode { commands })
    }

    fn command(&mut self, after: Option<&str>) -> Result<CommandNode, ParseError> {
        self.check_cancel()?;

        let mut argv = Vec::new();
        while let Some(tok) = self.peek() {
            if tok.kind != TokenKind::Word {
                break;
            }
            self.pos += 1;
            argv.push(word_value(&tok.value)?);
        }

        if argv.is_empty() {
            return Err(match (self.peek(), after) {
                (Some(tok), Some(op)) => ParseError::EmptyCommand {
                    context: format!("after '{op}'"),
                    found: tok.value.clone(),
                },
                (Some(tok), None) => ParseError::EmptyCommand {
                    context: "at start of input".into(),
                    found: tok.value.clone(),
                },
                (None, Some(op)) => ParseError::UnexpectedEnd { op: op.to_string() },
                (None, None) => ParseError::NoTokens,
            });
        }

        let redirs = self.redirections()?;
        Ok(CommandNode { argv, redirs })
    }

    fn redirections(&mut self) -> Result<Redirections, ParseError> {
        let mut redirs = Redirections::default();

        while let Some(tok) = self.peek() {
            if tok.kind != TokenKind::Op {
                break;
            }
            let op = tok.value.as_str();
            match op {
                "2>&1" => {
                    self.pos += 1;
                    if redirs.stderr_file.take().is_some() {
                        log::debug!("'2>&1' overrides earlier stderr redirection");
                    }
                    redirs.merge_stderr_to_stdout = true;
                }
                "<" => {
                    self.pos += 1;
                    let path = self.operand(op)?;
                    if let Some(prev) = redirs.stdin_file.replace(path) {
                        log::debug!("stdin redirection from {prev} overridden");
                    }
                }
                ">" | ">>" => {
                    self.pos += 1;
                    let path = self.operand(op)?;
                    let target = FileRedirect {
                        path,
                        append: op == ">>",
                    };
                    if let Some(prev) = redirs.stdout_file.replace(target) {
                        log::debug!("stdout redirection to {} overridden", prev.path);
                    }
                }
                "2>" | "2>>" => {
                    self.pos += 1;
                    let path = self.operand(op)?;
                    redirs.merge_stderr_to_stdout = false;
                    let target = FileRedirect {
                        path,
                        append: op == "2>>",
                    };
                    if let Some(prev) = redirs.stderr_file.replace(target) {
                        log::debug!("stderr redirection to {} overridden", prev.path);
                    }
                }
                _ => break,
            }
        }

        Ok(redirs)
    }

    fn operand(&mut self, op: &str) -> Result<String, ParseError> {
        match self.next() {
            Some(tok) if tok.kind == TokenKind::Word => word_value(&tok.value),
            _ => Err(ParseError::MissingOperand { op: op.to_string() }),
        }
    }
}

fn word_value(raw: &str) -> Result<String, ParseError> {
    unquote(raw).ok_or_else(|| ParseError::BadWord {
        word: raw.to_string(),
    })
}
