//! The generic string/TTL command module.
//!
//! GET, SET, MSET, MGET, DEL, EXISTS, the expiry family, and
//! INCR/DECR. These commands exercise the whole capability surface and
//! define the reference semantics other data-type modules follow.

use std::sync::Arc;

use cinder_protocol::Reply;

use super::wrong_arity;
use crate::context::HandlerContext;
use crate::error::CommandError;
use crate::registry::{CommandKeys, CommandSpec};
use crate::types::Value;

const EXPIRE_TIME_INTEGER: &str = "expire time must be integer";
const UNKNOWN_OPTION: &str = "unknown option";

/// The generic module's command descriptors.
pub fn commands() -> Vec<CommandSpec> {
    let mut specs = vec![
        write_command(
            "set",
            "(SET key value [NX|XX] [EX s|PX ms|EXAT s|PXAT ms] [GET]) \
             Set key to value with optional conditions and expiry.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() < 3 || cmd.len() > 7 {
                    return Err(wrong_arity("set"));
                }
                Ok(CommandKeys {
                    channels: vec![],
                    read_keys: vec![cmd[1].clone()],
                    write_keys: vec![cmd[1].clone()],
                })
            }),
            Arc::new(set_handler),
        ),
        read_command(
            "get",
            "(GET key) Get the string value of key.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() != 2 {
                    return Err(wrong_arity("get"));
                }
                Ok(CommandKeys::read(vec![cmd[1].clone()]))
            }),
            Arc::new(get_handler),
        ),
        write_command(
            "mset",
            "(MSET key value [key value ...]) Set multiple keys at once.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() < 3 {
                    return Err(wrong_arity("mset"));
                }
                if (cmd.len() - 1) % 2 != 0 {
                    return Err(CommandError::Semantic(
                        "each key must be paired with a value".into(),
                    ));
                }
                Ok(CommandKeys::write(
                    cmd[1..].iter().step_by(2).cloned().collect(),
                ))
            }),
            Arc::new(mset_handler),
        ),
        read_command(
            "mget",
            "(MGET key [key ...]) Get the values of all given keys.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() < 2 {
                    return Err(wrong_arity("mget"));
                }
                Ok(CommandKeys::read(cmd[1..].to_vec()))
            }),
            Arc::new(mget_handler),
        ),
        write_command(
            "del",
            "(DEL key [key ...]) Remove the given keys.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() < 2 {
                    return Err(wrong_arity("del"));
                }
                Ok(CommandKeys::write(cmd[1..].to_vec()))
            }),
            Arc::new(del_handler),
        ),
        read_command(
            "exists",
            "(EXISTS key [key ...]) Count how many of the given keys exist.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() < 2 {
                    return Err(wrong_arity("exists"));
                }
                Ok(CommandKeys::read(cmd[1..].to_vec()))
            }),
            Arc::new(exists_handler),
        ),
        write_command(
            "persist",
            "(PERSIST key) Remove the expiry from key.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() != 2 {
                    return Err(wrong_arity("persist"));
                }
                Ok(CommandKeys::write(vec![cmd[1].clone()]))
            }),
            Arc::new(persist_handler),
        ),
        write_command(
            "incr",
            "(INCR key) Increment the integer value of key by one.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() != 2 {
                    return Err(wrong_arity("incr"));
                }
                Ok(CommandKeys::write(vec![cmd[1].clone()]))
            }),
            Arc::new(incr_handler),
        ),
        write_command(
            "decr",
            "(DECR key) Decrement the integer value of key by one.",
            Arc::new(|cmd: &[String]| {
                if cmd.len() != 2 {
                    return Err(wrong_arity("decr"));
                }
                Ok(CommandKeys::write(vec![cmd[1].clone()]))
            }),
            Arc::new(decr_handler),
        ),
    ];

    for name in ["expire", "pexpire"] {
        specs.push(write_command(
            name,
            "(EXPIRE|PEXPIRE key n [NX|XX|GT|LT]) Set a relative expiry on key.",
            expiry_keys(name),
            Arc::new(expire_handler),
        ));
    }
    for name in ["expireat", "pexpireat"] {
        specs.push(write_command(
            name,
            "(EXPIREAT|PEXPIREAT key unix-time [NX|XX|GT|LT]) Set an absolute expiry on key.",
            expiry_keys(name),
            Arc::new(expireat_handler),
        ));
    }
    for name in ["ttl", "pttl"] {
        specs.push(read_command(
            name,
            "(TTL|PTTL key) Remaining time to live of key.",
            single_read_key(name),
            Arc::new(ttl_handler),
        ));
    }
    for name in ["expiretime", "pexpiretime"] {
        specs.push(read_command(
            name,
            "(EXPIRETIME|PEXPIRETIME key) Absolute expiry timestamp of key.",
            single_read_key(name),
            Arc::new(expiretime_handler),
        ));
    }

    specs
}

fn read_command(
    name: &str,
    description: &str,
    keys: crate::registry::KeyExtractor,
    handler: crate::registry::Handler,
) -> CommandSpec {
    CommandSpec {
        name: name.into(),
        module: "generic".into(),
        categories: vec!["read".into(), "keyspace".into()],
        description: description.into(),
        sub_commands: vec![],
        sync: false,
        keys,
        handler,
    }
}

fn write_command(
    name: &str,
    description: &str,
    keys: crate::registry::KeyExtractor,
    handler: crate::registry::Handler,
) -> CommandSpec {
    CommandSpec {
        name: name.into(),
        module: "generic".into(),
        categories: vec!["write".into(), "keyspace".into()],
        description: description.into(),
        sub_commands: vec![],
        sync: true,
        keys,
        handler,
    }
}

fn single_read_key(name: &str) -> crate::registry::KeyExtractor {
    let name = name.to_string();
    Arc::new(move |cmd: &[String]| {
        if cmd.len() != 2 {
            return Err(wrong_arity(&name));
        }
        Ok(CommandKeys::read(vec![cmd[1].clone()]))
    })
}

fn expiry_keys(name: &str) -> crate::registry::KeyExtractor {
    let name = name.to_string();
    Arc::new(move |cmd: &[String]| {
        if cmd.len() < 3 || cmd.len() > 4 {
            return Err(wrong_arity(&name));
        }
        Ok(CommandKeys::write(vec![cmd[1].clone()]))
    })
}

// ---------------------------------------------------------------------------
// handlers
// ---------------------------------------------------------------------------

fn set_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    let cmd = ctx.cmd;
    if cmd.len() < 3 || cmd.len() > 7 {
        return Err(wrong_arity("set"));
    }
    let key = &cmd[1];
    let value = &cmd[2];

    let now = ctx.caps.clock().now_ms();
    let mut nx = false;
    let mut xx = false;
    let mut return_old = false;
    let mut expire_at: Option<i64> = None;

    let mut i = 3;
    while i < cmd.len() {
        let opt = cmd[i].to_ascii_uppercase();
        match opt.as_str() {
            "NX" => {
                if xx {
                    return Err(CommandError::Semantic(
                        "cannot specify both NX and XX options".into(),
                    ));
                }
                nx = true;
            }
            "XX" => {
                if nx {
                    return Err(CommandError::Semantic(
                        "cannot specify both NX and XX options".into(),
                    ));
                }
                xx = true;
            }
            "GET" => return_old = true,
            "EX" | "PX" | "EXAT" | "PXAT" => {
                if expire_at.is_some() {
                    return Err(CommandError::Semantic(
                        "cannot specify more than one expiry option".into(),
                    ));
                }
                let arg = cmd
                    .get(i + 1)
                    .ok_or_else(|| CommandError::Parse(EXPIRE_TIME_INTEGER.into()))?;
                let n: i64 = arg
                    .parse()
                    .map_err(|_| CommandError::Parse(EXPIRE_TIME_INTEGER.into()))?;
                expire_at = Some(match opt.as_str() {
                    "EX" => now.saturating_add(n.saturating_mul(1000)),
                    "PX" => now.saturating_add(n),
                    "EXAT" => n.saturating_mul(1000),
                    _ => n,
                });
                i += 1;
            }
            _ => return Err(CommandError::Semantic(UNKNOWN_OPTION.into())),
        }
        i += 1;
    }

    let exists = ctx
        .caps
        .keys_exist(std::slice::from_ref(key))
        .get(key)
        .copied()
        .unwrap_or(false);
    if nx && exists {
        return Err(CommandError::Semantic(format!("key {key} already exists")));
    }
    if xx && !exists {
        return Err(CommandError::Semantic(format!("key {key} does not exist")));
    }

    let previous = if return_old {
        Some(
            ctx.caps
                .get_values(ctx.session, std::slice::from_ref(key))
                .remove(key)
                .flatten(),
        )
    } else {
        None
    };

    ctx.caps
        .set_values(ctx.session, vec![(key.clone(), Value::from(value.as_str()))])?;
    if expire_at.is_some() {
        ctx.caps.set_expiry(ctx.session, key, expire_at, false);
    }

    let reply = match previous {
        None => Reply::ok(),
        Some(Some(old)) => Reply::Bulk(old.as_bytes().clone()),
        Some(None) => Reply::Null,
    };
    Ok(reply.to_bytes())
}

fn get_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    if ctx.cmd.len() != 2 {
        return Err(wrong_arity("get"));
    }
    let key = &ctx.cmd[1];
    let value = ctx
        .caps
        .get_values(ctx.session, std::slice::from_ref(key))
        .remove(key)
        .flatten();
    let reply = match value {
        Some(v) => Reply::Bulk(v.as_bytes().clone()),
        None => Reply::Null,
    };
    Ok(reply.to_bytes())
}

fn mset_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    let cmd = ctx.cmd;
    if cmd.len() < 3 {
        return Err(wrong_arity("mset"));
    }
    if (cmd.len() - 1) % 2 != 0 {
        return Err(CommandError::Semantic(
            "each key must be paired with a value".into(),
        ));
    }
    let entries = cmd[1..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), Value::from(pair[1].as_str())))
        .collect();
    ctx.caps.set_values(ctx.session, entries)?;
    Ok(Reply::ok().to_bytes())
}

fn mget_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    if ctx.cmd.len() < 2 {
        return Err(wrong_arity("mget"));
    }
    let keys = ctx.cmd[1..].to_vec();
    let values = ctx.caps.get_values(ctx.session, &keys);
    // reply preserves request order, including duplicates
    let items = keys
        .iter()
        .map(|key| match values.get(key) {
            Some(Some(v)) => Reply::Bulk(v.as_bytes().clone()),
            _ => Reply::Null,
        })
        .collect();
    Ok(Reply::Array(items).to_bytes())
}

fn del_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    if ctx.cmd.len() < 2 {
        return Err(wrong_arity("del"));
    }
    let mut removed = 0i64;
    for key in &ctx.cmd[1..] {
        if ctx.caps.delete_key(key) {
            removed += 1;
        }
    }
    Ok(Reply::Integer(removed).to_bytes())
}

fn exists_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    if ctx.cmd.len() < 2 {
        return Err(wrong_arity("exists"));
    }
    let keys = ctx.cmd[1..].to_vec();
    let present = ctx.caps.keys_exist(&keys);
    let count = keys
        .iter()
        .filter(|key| present.get(*key).copied().unwrap_or(false))
        .count();
    Ok(Reply::Integer(count as i64).to_bytes())
}

fn persist_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    if ctx.cmd.len() != 2 {
        return Err(wrong_arity("persist"));
    }
    let key = &ctx.cmd[1];
    let exists = ctx
        .caps
        .keys_exist(std::slice::from_ref(key))
        .get(key)
        .copied()
        .unwrap_or(false);
    if !exists || ctx.caps.get_expiry(key).is_none() {
        return Ok(Reply::Integer(0).to_bytes());
    }
    ctx.caps.set_expiry(ctx.session, key, None, false);
    Ok(Reply::Integer(1).to_bytes())
}

fn expire_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    let cmd = ctx.cmd;
    let name = cmd[0].to_ascii_lowercase();
    if cmd.len() < 3 || cmd.len() > 4 {
        return Err(wrong_arity(&name));
    }
    let n: i64 = cmd[2]
        .parse()
        .map_err(|_| CommandError::Parse(EXPIRE_TIME_INTEGER.into()))?;
    let now = ctx.caps.clock().now_ms();
    let new_at = if name == "expire" {
        now.saturating_add(n.saturating_mul(1000))
    } else {
        now.saturating_add(n)
    };
    apply_expiry_update(&ctx, &cmd[1], new_at, cmd.get(3))
}

fn expireat_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    let cmd = ctx.cmd;
    let name = cmd[0].to_ascii_lowercase();
    if cmd.len() < 3 || cmd.len() > 4 {
        return Err(wrong_arity(&name));
    }
    let n: i64 = cmd[2]
        .parse()
        .map_err(|_| CommandError::Parse(EXPIRE_TIME_INTEGER.into()))?;
    let new_at = if name == "expireat" {
        n.saturating_mul(1000)
    } else {
        n
    };
    apply_expiry_update(&ctx, &cmd[1], new_at, cmd.get(3))
}

/// Shared NX/XX/GT/LT gate for the EXPIRE family. Replies 1 when the
/// expiry was rewritten, 0 when the key is missing or the flag vetoed
/// the update.
fn apply_expiry_update(
    ctx: &HandlerContext<'_>,
    key: &String,
    new_at: i64,
    flag: Option<&String>,
) -> Result<Vec<u8>, CommandError> {
    let exists = ctx
        .caps
        .keys_exist(std::slice::from_ref(key))
        .get(key)
        .copied()
        .unwrap_or(false);
    if !exists {
        return Ok(Reply::Integer(0).to_bytes());
    }

    let current = ctx.caps.get_expiry(key);
    let allowed = match flag.map(|f| f.to_ascii_uppercase()) {
        None => true,
        Some(f) => match f.as_str() {
            "NX" => current.is_none(),
            "XX" => current.is_some(),
            // a missing current expiry counts as "not greater"
            "GT" => matches!(current, Some(cur) if new_at > cur),
            "LT" => current.map_or(true, |cur| new_at < cur),
            _ => return Err(CommandError::Semantic(UNKNOWN_OPTION.into())),
        },
    };
    if !allowed {
        return Ok(Reply::Integer(0).to_bytes());
    }

    ctx.caps.set_expiry(ctx.session, key, Some(new_at), true);
    Ok(Reply::Integer(1).to_bytes())
}

fn ttl_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    let cmd = ctx.cmd;
    let name = cmd[0].to_ascii_lowercase();
    if cmd.len() != 2 {
        return Err(wrong_arity(&name));
    }
    let key = &cmd[1];
    let exists = ctx
        .caps
        .keys_exist(std::slice::from_ref(key))
        .get(key)
        .copied()
        .unwrap_or(false);
    if !exists {
        return Ok(Reply::Integer(-2).to_bytes());
    }
    let reply = match ctx.caps.get_expiry(key) {
        None => Reply::Integer(-1),
        Some(at) => {
            let remaining = (at - ctx.caps.clock().now_ms()).max(0);
            if name == "ttl" {
                Reply::Integer(remaining / 1000)
            } else {
                Reply::Integer(remaining)
            }
        }
    };
    Ok(reply.to_bytes())
}

fn expiretime_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    let cmd = ctx.cmd;
    let name = cmd[0].to_ascii_lowercase();
    if cmd.len() != 2 {
        return Err(wrong_arity(&name));
    }
    let key = &cmd[1];
    let exists = ctx
        .caps
        .keys_exist(std::slice::from_ref(key))
        .get(key)
        .copied()
        .unwrap_or(false);
    if !exists {
        return Ok(Reply::Integer(-2).to_bytes());
    }
    let reply = match ctx.caps.get_expiry(key) {
        None => Reply::Integer(-1),
        Some(at) => {
            if name == "expiretime" {
                Reply::Integer(at / 1000)
            } else {
                Reply::Integer(at)
            }
        }
    };
    Ok(reply.to_bytes())
}

fn incr_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    adjust_by(ctx, 1, "incr")
}

fn decr_handler(ctx: HandlerContext<'_>) -> Result<Vec<u8>, CommandError> {
    adjust_by(ctx, -1, "decr")
}

/// Creates the key as "0" when missing, then adjusts it by `delta` and
/// writes back the new integer.
fn adjust_by(ctx: HandlerContext<'_>, delta: i64, name: &str) -> Result<Vec<u8>, CommandError> {
    if ctx.cmd.len() != 2 {
        return Err(wrong_arity(name));
    }
    let key = &ctx.cmd[1];
    let current = ctx
        .caps
        .get_values(ctx.session, std::slice::from_ref(key))
        .remove(key)
        .flatten();
    let current = match current {
        None => 0,
        Some(v) => v.as_i64().ok_or(CommandError::NotAnInteger)?,
    };
    let updated = current
        .checked_add(delta)
        .ok_or(CommandError::NotAnInteger)?;
    ctx.caps.set_values(
        ctx.session,
        vec![(key.clone(), Value::from(updated.to_string()))],
    )?;
    Ok(Reply::Integer(updated).to_bytes())
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::error::DispatchError;
    use cinder_protocol::encode_command;

    fn run(engine: &std::sync::Arc<Engine>, tokens: &[&str]) -> Result<Vec<u8>, DispatchError> {
        let ctx = engine.session("test");
        let raw = encode_command(&tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>());
        engine.handle_command(&ctx, &raw, None, false, false)
    }

    fn err_of(engine: &std::sync::Arc<Engine>, tokens: &[&str]) -> String {
        run(engine, tokens).unwrap_err().to_string()
    }

    fn engine() -> std::sync::Arc<Engine> {
        Engine::builder("cmd-test").synchronous_cache_updates().build()
    }

    #[test]
    fn set_rejects_conflicting_conditions() {
        let e = engine();
        assert_eq!(
            err_of(&e, &["SET", "k", "v", "NX", "XX"]),
            "cannot specify both NX and XX options"
        );
        assert_eq!(
            err_of(&e, &["SET", "k", "v", "XX", "NX"]),
            "cannot specify both NX and XX options"
        );
    }

    #[test]
    fn set_rejects_duplicate_expiry_options() {
        let e = engine();
        assert_eq!(
            err_of(&e, &["SET", "k", "v", "EX", "10", "PX", "1000"]),
            "cannot specify more than one expiry option"
        );
        assert_eq!(
            err_of(&e, &["SET", "k", "v", "EX", "10", "PXAT"]),
            "cannot specify more than one expiry option"
        );
    }

    #[test]
    fn set_rejects_malformed_expiry_argument() {
        let e = engine();
        assert_eq!(
            err_of(&e, &["SET", "k", "v", "EX"]),
            "expire time must be integer"
        );
        assert_eq!(
            err_of(&e, &["SET", "k", "v", "EX", "soon"]),
            "expire time must be integer"
        );
    }

    #[test]
    fn set_rejects_unknown_option() {
        let e = engine();
        assert_eq!(err_of(&e, &["SET", "k", "v", "BOGUS"]), "unknown option");
    }

    #[test]
    fn set_options_are_case_insensitive() {
        let e = engine();
        assert_eq!(run(&e, &["SET", "k", "v", "nx"]).unwrap(), b"+OK\r\n");
        assert_eq!(
            err_of(&e, &["SET", "k", "v2", "nx"]),
            "key k already exists"
        );
    }

    #[test]
    fn set_get_option_returns_previous_value() {
        let e = engine();
        // no previous value: nil
        assert_eq!(run(&e, &["SET", "k", "v1", "GET"]).unwrap(), b"$-1\r\n");
        // previous value comes back, new value lands
        assert_eq!(
            run(&e, &["SET", "k", "v2", "GET"]).unwrap(),
            b"$2\r\nv1\r\n"
        );
        assert_eq!(run(&e, &["GET", "k"]).unwrap(), b"$2\r\nv2\r\n");
    }

    #[test]
    fn expire_rejects_non_integer_and_unknown_flag() {
        let e = engine();
        run(&e, &["SET", "k", "v"]).unwrap();
        assert_eq!(
            err_of(&e, &["EXPIRE", "k", "soon"]),
            "expire time must be integer"
        );
        assert_eq!(err_of(&e, &["EXPIRE", "k", "10", "ZZ"]), "unknown option");
    }

    #[test]
    fn incr_overflow_is_out_of_range() {
        let e = engine();
        run(&e, &["SET", "k", &i64::MAX.to_string()]).unwrap();
        assert_eq!(
            err_of(&e, &["INCR", "k"]),
            "value is not an integer or out of range"
        );
    }

    #[test]
    fn arity_errors_name_the_command() {
        let e = engine();
        for (cmd, msg) in [
            (vec!["GET"], "wrong number of arguments for 'get' command"),
            (
                vec!["SET", "k"],
                "wrong number of arguments for 'set' command",
            ),
            (vec!["MGET"], "wrong number of arguments for 'mget' command"),
            (vec!["DEL"], "wrong number of arguments for 'del' command"),
            (
                vec!["TTL", "k", "extra"],
                "wrong number of arguments for 'ttl' command",
            ),
            (
                vec!["PTTL"],
                "wrong number of arguments for 'pttl' command",
            ),
            (
                vec!["EXPIRE", "k"],
                "wrong number of arguments for 'expire' command",
            ),
            (
                vec!["PERSIST"],
                "wrong number of arguments for 'persist' command",
            ),
            (
                vec!["INCR", "k", "2"],
                "wrong number of arguments for 'incr' command",
            ),
        ] {
            let tokens: Vec<&str> = cmd.clone();
            assert_eq!(err_of(&e, &tokens), msg, "command {cmd:?}");
        }
    }
}
