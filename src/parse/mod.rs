pub mod shell;
pub mod tokenize;
pub mod types;

pub use shell::parse;
pub use tokenize::{tokenize, unquote};
pub use types::{
    CommandNode, Connector, FileRedirect, PipelineNode, Redirections, SequenceNode, Token,
    TokenKind,
};
