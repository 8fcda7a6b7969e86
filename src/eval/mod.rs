pub mod context;
pub mod paths;

pub use context::ValidationContext;

use tokio_util::sync::CancellationToken;

use crate::error::ValidationError;
use crate::parse::{CommandNode, SequenceNode};

/// Shape of the command's surroundings, for the feature-gate checks.
#[derive(Debug, Clone, Copy)]
struct Placement {
    in_pipeline: bool,
    in_sequence: bool,
}

/// Check an AST against the allowlist, feature toggles, limits and containment.
///
/// The working directory must itself lie within the base directory, or
/// bare relative words could name anything. Then per command, in order,
/// first failure wins: segment limit, allowlist, pipes, chaining,
/// redirection, argument paths, redirection paths. Nothing is executed and
/// the filesystem is not touched.
pub fn validate(
    ast: &SequenceNode,
    ctx: &ValidationContext,
    cancel: Option<&CancellationToken>,
) -> Result<(), ValidationError> {
    let root = ctx.root();
    let cwd = ctx.resolution_dir();
    if !paths::is_within(&root, &cwd) {
        return Err(ValidationError::CwdEscape {
            cwd: cwd.display().to_string(),
            base: root.display().to_string(),
        });
    }

    let in_sequence = ast.items.len() > 1;
    let mut count = 0usize;

    for pipeline in &ast.items {
        let in_pipeline = pipeline.commands.len() > 1;
        for command in &pipeline.commands {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(ValidationError::Cancelled);
            }
            count += 1;
            validate_command(
                command,
                ctx,
                count,
                Placement {
                    in_pipeline,
                    in_sequence,
                },
            )?;
        }
    }

    log::debug!("validated {count} command(s)");
    Ok(())
}

fn validate_command(
    command: &CommandNode,
    ctx: &ValidationContext,
    running_count: usize,
    placement: Placement,
) -> Result<(), ValidationError> {
    let config = &ctx.config;
    let program = command.program();

    if running_count > config.max_segments {
        return Err(ValidationError::TooManySegments {
            count: running_count,
            limit: config.max_segments,
        });
    }

    if !ctx.is_allowed(program) {
        return Err(ValidationError::CommandNotAllowed {
            command: program.to_string(),
            allowed: ctx.allowed_list(),
        });
    }

    if placement.in_pipeline && !config.allow_pipes {
        return Err(ValidationError::PipesDisabled {
            command: program.to_string(),
        });
    }

    if placement.in_sequence && !config.allow_chaining {
        return Err(ValidationError::ChainingDisabled {
            command: program.to_string(),
        });
    }

    if let Some(stream) = command.redirs.first_stream()
        && !config.allow_redirection
    {
        return Err(ValidationError::RedirectionDisabled {
            command: program.to_string(),
            stream,
        });
    }

    check_argument_paths(command, ctx)?;

    for path in command.redirs.paths() {
        if !contained(ctx, path) {
            return Err(ValidationError::RedirectEscape {
                command: program.to_string(),
                path: path.to_string(),
                base: ctx.root().display().to_string(),
            });
        }
    }

    Ok(())
}

fn check_argument_paths(command: &CommandNode, ctx: &ValidationContext) -> Result<(), ValidationError> {
    let mut after_free_text_flag = false;
    for arg in command.args() {
        if after_free_text_flag {
            after_free_text_flag = false;
            continue;
        }
        if arg.starts_with('-') {
            after_free_text_flag = ctx.is_free_text_flag(arg);
            continue;
        }
        if paths::looks_like_path(arg) && !contained(ctx, arg) {
            return Err(ValidationError::PathEscape {
                command: command.program().to_string(),
                path: arg.clone(),
                base: ctx.root().display().to_string(),
            });
        }
    }
    Ok(())
}

fn contained(ctx: &ValidationContext, path: &str) -> bool {
    paths::is_within(&ctx.root(), &ctx.resolve(path))
}
