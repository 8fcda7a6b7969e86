use tokio_util::sync::CancellationToken;

use super::types::Token;
use crate::error::TokenizeError;

/// Operators recognised anywhere outside quotes, longest first.
const OPERATORS: &[&str] = &["&&", "||", ">>", ";", "|", ">", "<"];

/// Operators that start with a file-descriptor digit, longest first.
/// `2>&1` comes first so it is never split into `2>` + `&1`.
/// Only matched at a word boundary.
const FD_OPERATORS: &[&str] = &["2>&1", "2>>", "2>"];

/// Pathname-expansion metacharacters, refused outside quotes.
const GLOB_CHARS: &[char] = &['*', '?', '['];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Lex a command line into WORD/OP tokens.
///
/// Quote marks and backslash escapes stay in the word values; the parser
/// strips them with [`unquote`]. Disallowed constructs are rejected outright,
/// never approximated.
pub fn tokenize(
    input: &str,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<Token>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut quote = Quote::None;
    let mut quote_start = 0;
    let mut esc = false;

    let mut i = 0;
    while i < input.len() {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(TokenizeError::Cancelled);
        }

        let rest = &input[i..];
        let Some(c) = rest.chars().next() else {
            break;
        };

        // These are refused whatever the quote state.
        match c {
            '`' => return Err(TokenizeError::Backtick),
            '\n' | '\r' => return Err(TokenizeError::Newline),
            '$' if rest.starts_with("$(") => return Err(TokenizeError::CommandSubstitution),
            _ => {}
        }

        if esc {
            buf.push(c);
            esc = false;
            i += c.len_utf8();
            continue;
        }
        if c == '\\' && quote != Quote::Single {
            esc = true;
            buf.push(c);
            i += 1;
            continue;
        }

        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                }
                buf.push(c);
                i += c.len_utf8();
                continue;
            }
            Quote::Double => {
                if c == '"' {
                    quote = Quote::None;
                } else if c == '$'
                    && let Some(name) = expansion_at(rest)
                {
                    return Err(TokenizeError::Variable { name });
                }
                buf.push(c);
                i += c.len_utf8();
                continue;
            }
            Quote::None => {}
        }

        if c == '\'' || c == '"' {
            quote = if c == '\'' { Quote::Single } else { Quote::Double };
            quote_start = i;
            buf.push(c);
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            flush(&mut buf, &mut tokens);
            i += c.len_utf8();
            continue;
        }

        if buf.is_empty()
            && let Some(op) = FD_OPERATORS.iter().find(|op| rest.starts_with(**op))
        {
            tokens.push(Token::op(*op));
            i += op.len();
            continue;
        }

        if rest.starts_with("<<") {
            return Err(TokenizeError::HereDoc);
        }

        if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            flush(&mut buf, &mut tokens);
            tokens.push(Token::op(*op));
            i += op.len();
            continue;
        }

        // Anything that reaches here as '&' is not part of '&&'.
        if c == '&' {
            return Err(TokenizeError::Background);
        }
        if c == '$'
            && let Some(name) = expansion_at(rest)
        {
            return Err(TokenizeError::Variable { name });
        }
        if GLOB_CHARS.contains(&c) {
            return Err(TokenizeError::Glob { ch: c });
        }

        buf.push(c);
        i += c.len_utf8();
    }

    if esc {
        return Err(TokenizeError::DanglingEscape);
    }
    match quote {
        Quote::None => {}
        Quote::Single => {
            return Err(TokenizeError::UnterminatedQuote {
                quote: "single",
                offset: quote_start,
            });
        }
        Quote::Double => {
            return Err(TokenizeError::UnterminatedQuote {
                quote: "double",
                offset: quote_start,
            });
        }
    }

    flush(&mut buf, &mut tokens);
    if tokens.is_empty() {
        return Err(TokenizeError::Empty);
    }
    Ok(tokens)
}

/// The parameter a shell would expand at `rest` (which starts with `$`).
/// A `$` at the end of a word stays literal.
fn expansion_at(rest: &str) -> Option<String> {
    let after = rest.strip_prefix('$')?;
    let first = after.chars().next()?;
    if first.is_whitespace() || first == '"' {
        return None;
    }
    let name: String = after
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '{' | '}'))
        .collect();
    Some(if name.is_empty() { first.to_string() } else { name })
}

fn flush(buf: &mut String, tokens: &mut Vec<Token>) {
    if !buf.is_empty() {
        tokens.push(Token::word(std::mem::take(buf)));
    }
}

/// Strip quote marks and escapes from a word using shlex (POSIX word rules).
///
/// Returns `None` if the word does not reduce to exactly one word, which the
/// tokenizer should already have ruled out.
pub fn unquote(word: &str) -> Option<String> {
    // shlex reads a leading '#' as a comment; here it is a literal.
    let mut words = if word.starts_with('#') {
        shlex::split(&format!("\\{word}"))?
    } else {
        shlex::split(word)?
    };
    if words.len() == 1 { words.pop() } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(input: &str) -> Vec<String> {
        tokenize(input, None)
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn tokenize_simple() {
        assert_eq!(values("ls -la /tmp"), vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn tokenize_keeps_quotes() {
        assert_eq!(values("echo 'hello world'"), vec!["echo", "'hello world'"]);
        assert_eq!(values("echo \"a | b\""), vec!["echo", "\"a | b\""]);
    }

    #[test]
    fn tokenize_operators_without_spaces() {
        assert_eq!(
            values("ls|wc -l&&echo ok;pwd"),
            vec!["ls", "|", "wc", "-l", "&&", "echo", "ok", ";", "pwd"]
        );
    }

    #[test]
    fn tokenize_fd_dup_not_split() {
        let tokens = tokenize("cargo test 2>&1", None).unwrap();
        assert_eq!(tokens.last(), Some(&Token::op("2>&1")));
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn tokenize_stderr_redirects() {
        assert_eq!(values("cmd 2> err"), vec!["cmd", "2>", "err"]);
        assert_eq!(values("cmd 2>>err"), vec!["cmd", "2>>", "err"]);
        assert_eq!(values("cmd >> out"), vec!["cmd", ">>", "out"]);
    }

    #[test]
    fn fd_prefix_only_at_word_boundary() {
        assert_eq!(values("echo file2>out"), vec!["echo", "file2", ">", "out"]);
        assert_eq!(values("echo 2"), vec!["echo", "2"]);
    }

    #[test]
    fn operators_inside_quotes_are_words() {
        assert_eq!(values("echo 'a && b; c > d'"), vec!["echo", "'a && b; c > d'"]);
        assert_eq!(values("echo \"x&y\""), vec!["echo", "\"x&y\""]);
    }

    #[test]
    fn escaped_space_stays_in_word() {
        assert_eq!(values("cat my\\ file"), vec!["cat", "my\\ file"]);
    }

    #[test]
    fn reject_backtick() {
        assert_eq!(tokenize("echo `whoami`", None), Err(TokenizeError::Backtick));
        assert_eq!(tokenize("echo '`x`'", None), Err(TokenizeError::Backtick));
    }

    #[test]
    fn reject_newline() {
        assert_eq!(tokenize("ls\nrm x", None), Err(TokenizeError::Newline));
        assert_eq!(tokenize("ls\r", None), Err(TokenizeError::Newline));
    }

    #[test]
    fn reject_dollar_paren() {
        assert_eq!(
            tokenize("echo $(id)", None),
            Err(TokenizeError::CommandSubstitution)
        );
        assert_eq!(
            tokenize("echo \"$(id)\"", None),
            Err(TokenizeError::CommandSubstitution)
        );
    }

    #[test]
    fn reject_background() {
        assert_eq!(tokenize("sleep 10 &", None), Err(TokenizeError::Background));
        assert_eq!(tokenize("cmd >&2", None), Err(TokenizeError::Background));
        assert_eq!(tokenize("cmd |& cat", None), Err(TokenizeError::Background));
    }

    #[test]
    fn quoted_ampersand_allowed() {
        assert_eq!(values("echo 'a & b'"), vec!["echo", "'a & b'"]);
    }

    #[test]
    fn reject_heredoc() {
        assert_eq!(tokenize("cat <<EOF", None), Err(TokenizeError::HereDoc));
        assert_eq!(tokenize("cat <<< hi", None), Err(TokenizeError::HereDoc));
    }

    #[test]
    fn reject_unterminated_quote() {
        assert_eq!(
            tokenize("echo 'oops", None),
            Err(TokenizeError::UnterminatedQuote {
                quote: "single",
                offset: 5
            })
        );
        assert!(matches!(
            tokenize("echo \"oops", None),
            Err(TokenizeError::UnterminatedQuote { quote: "double", .. })
        ));
    }

    #[test]
    fn reject_dangling_escape() {
        assert_eq!(tokenize("echo \\", None), Err(TokenizeError::DanglingEscape));
    }

    #[test]
    fn reject_variables() {
        assert_eq!(
            tokenize("echo $HOME", None),
            Err(TokenizeError::Variable { name: "HOME".into() })
        );
        assert_eq!(
            tokenize("echo ${X}", None),
            Err(TokenizeError::Variable { name: "{X}".into() })
        );
        assert_eq!(
            tokenize("echo \"dir: $PWD\"", None),
            Err(TokenizeError::Variable { name: "PWD".into() })
        );
        assert_eq!(
            tokenize("echo $?", None),
            Err(TokenizeError::Variable { name: "?".into() })
        );
    }

    #[test]
    fn literal_dollars_allowed() {
        assert_eq!(values("echo '$HOME'"), vec!["echo", "'$HOME'"]);
        assert_eq!(values("echo \\$HOME"), vec!["echo", "\\$HOME"]);
        assert_eq!(values("echo costs 5$"), vec!["echo", "costs", "5$"]);
        assert_eq!(values("echo \"5$\""), vec!["echo", "\"5$\""]);
    }

    #[test]
    fn reject_unquoted_globs() {
        assert_eq!(tokenize("ls *.rs", None), Err(TokenizeError::Glob { ch: '*' }));
        assert_eq!(tokenize("ls file?.txt", None), Err(TokenizeError::Glob { ch: '?' }));
        assert_eq!(tokenize("ls [ab].txt", None), Err(TokenizeError::Glob { ch: '[' }));
    }

    #[test]
    fn quoted_or_escaped_globs_are_literal() {
        assert_eq!(values("grep 'a*b' x"), vec!["grep", "'a*b'", "x"]);
        assert_eq!(values("grep \"[0-9]?\" x"), vec!["grep", "\"[0-9]?\"", "x"]);
        assert_eq!(values("echo \\*"), vec!["echo", "\\*"]);
    }

    #[test]
    fn reject_empty() {
        assert_eq!(tokenize("", None), Err(TokenizeError::Empty));
        assert_eq!(tokenize("   \t ", None), Err(TokenizeError::Empty));
    }

    #[test]
    fn cancelled_token_stops_lexing() {
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(tokenize("ls", Some(&token)), Err(TokenizeError::Cancelled));
    }

    #[test]
    fn non_ascii_words() {
        assert_eq!(values("echo héllo wörld"), vec!["echo", "héllo", "wörld"]);
    }

    #[test]
    fn unquote_words() {
        assert_eq!(unquote("'hello world'").as_deref(), Some("hello world"));
        assert_eq!(unquote("\"it's\"").as_deref(), Some("it's"));
        assert_eq!(unquote("my\\ file").as_deref(), Some("my file"));
        assert_eq!(unquote("''").as_deref(), Some(""));
        assert_eq!(unquote("plain").as_deref(), Some("plain"));
        assert_eq!(unquote("#42").as_deref(), Some("#42"));
        assert_eq!(unquote("issue#42").as_deref(), Some("issue#42"));
    }
}
