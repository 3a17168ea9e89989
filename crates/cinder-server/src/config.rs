//! Server configuration parsing.
//!
//! Handles conversion from CLI-friendly strings (like "100M", "1G")
//! to the internal config types used by the engine.

use cinder_core::{EvictionPolicy, KeyspaceConfig, DEFAULT_EVICTION_SAMPLE};
use cinder_persistence::FsyncPolicy;

/// Parses a human-readable byte size string into a number of bytes.
///
/// Supports suffixes: K/KB (kibibytes), M/MB (mebibytes), G/GB (gibibytes).
/// Plain numbers are treated as bytes. Case insensitive.
///
/// # Examples
///
/// - "1024" → 1024
/// - "100K" → 102400
/// - "50M" → 52428800
/// - "2G" → 2147483648
pub fn parse_byte_size(input: &str) -> Result<usize, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty byte size string".into());
    }

    let upper = input.to_ascii_uppercase();

    let (num_str, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('K') {
        (n, 1024)
    } else {
        (upper.as_str(), 1)
    };

    let num: usize = num_str
        .parse()
        .map_err(|_| format!("invalid byte size: '{input}'"))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| format!("byte size overflow: '{input}'"))
}

/// Parses an eviction policy name from a CLI string.
pub fn parse_eviction_policy(input: &str) -> Result<EvictionPolicy, String> {
    match input.to_ascii_lowercase().as_str() {
        "noeviction" => Ok(EvictionPolicy::NoEviction),
        "allkeys-lfu" => Ok(EvictionPolicy::AllKeysLfu),
        "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
        "volatile-lfu" => Ok(EvictionPolicy::VolatileLfu),
        "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
        "allkeys-random" => Ok(EvictionPolicy::AllKeysRandom),
        "volatile-random" => Ok(EvictionPolicy::VolatileRandom),
        _ => Err(format!(
            "unknown eviction policy '{input}'. valid options: noeviction, allkeys-lfu, \
             allkeys-lru, volatile-lfu, volatile-lru, allkeys-random, volatile-random"
        )),
    }
}

/// Parses an fsync policy name from a CLI string.
pub fn parse_fsync_policy(input: &str) -> Result<FsyncPolicy, String> {
    match input.to_ascii_lowercase().as_str() {
        "always" => Ok(FsyncPolicy::Always),
        "everysec" => Ok(FsyncPolicy::EverySec),
        "no" => Ok(FsyncPolicy::No),
        _ => Err(format!(
            "unknown fsync policy '{input}'. valid options: always, everysec, no"
        )),
    }
}

/// Builds a `KeyspaceConfig` from parsed CLI options.
pub fn build_keyspace_config(
    max_memory: Option<usize>,
    eviction_policy: EvictionPolicy,
    eviction_sample: Option<usize>,
) -> KeyspaceConfig {
    KeyspaceConfig {
        max_memory,
        eviction_policy,
        eviction_sample: eviction_sample.unwrap_or(DEFAULT_EVICTION_SAMPLE),
    }
}
