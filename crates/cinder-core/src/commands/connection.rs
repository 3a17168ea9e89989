//! Connection-level commands: PING and ECHO.

use std::sync::Arc;

use cinder_protocol::Reply;

use super::wrong_arity;
use crate::context::HandlerContext;
use crate::error::CommandError;
use crate::registry::{CommandKeys, CommandSpec};

/// The connection module's command descriptors.
pub fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "ping".into(),
            module: "connection".into(),
            categories: vec!["fast".into(), "connection".into()],
            description: "(PING [message]) Test the connection, optionally echoing a message."
                .into(),
            sub_commands: vec![],
            sync: false,
            keys: Arc::new(|cmd: &[String]| {
                if cmd.len() > 2 {
                    return Err(wrong_arity("ping"));
                }
                Ok(CommandKeys::none())
            }),
            handler: Arc::new(ping_handler),
        },
        CommandSpec {
            name: "echo".into(),
            module: "connection".into(),
            categories: vec!["fast".into(), "connection".into()],
            description: "(ECHO message) Return the given message.".into(),
            sub_commands: vec![],
            sync: false,
            keys: Arc::new(|cmd: &[String]| {
                if cmd.len() != 2 {
                    return Err(wrong_arity("echo"));
                }
                Ok(CommandKeys::none())
            }),
            handler: Arc::new(echo_handler),
        },
    ]
}

fn ping_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    match ctx.cmd.len() {
        1 => Ok(Reply::Simple("PONG".into()).to_bytes()),
        2 => Ok(Reply::bulk(ctx.cmd[1].clone().into_bytes()).to_bytes()),
        _ => Err(wrong_arity("ping")),
    }
}

fn echo_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    if ctx.cmd.len() != 2 {
        return Err(wrong_arity("echo"));
    }
    Ok(Reply::bulk(ctx.cmd[1].clone().into_bytes()).to_bytes())
}
