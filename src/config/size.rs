//! Size strings such as `200Mi`, `1MiB`, `500MB` or `1024`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;

static SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)\s*([A-Za-z]*)$").expect("static size regex"));

/// Parse a size string into bytes. Empty or `"0"` means unlimited (0).
///
/// Units are case-insensitive: `B` or none for bytes, `K M G T P E`
/// (optionally followed by `B`) are powers of 1000, and `Ki Mi Gi Ti Pi Ei`
/// (optionally followed by `B`) are powers of 1024.
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return Ok(0);
    }

    let invalid = |reason: String| ConfigError::InvalidSize {
        value: input.to_string(),
        reason,
    };

    let caps = SIZE.captures(trimmed).ok_or_else(|| {
        invalid("must be numeric with an optional unit suffix (e.g. '200Mi', '1MiB', '500MB')".into())
    })?;

    let number: u64 = caps[1]
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;

    let unit = caps[2].to_ascii_lowercase();
    let factor: u64 = match unit.as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1000,
        "m" | "mb" => 1000u64.pow(2),
        "g" | "gb" => 1000u64.pow(3),
        "t" | "tb" => 1000u64.pow(4),
        "p" | "pb" => 1000u64.pow(5),
        "e" | "eb" => 1000u64.pow(6),
        "ki" | "kib" => 1 << 10,
        "mi" | "mib" => 1 << 20,
        "gi" | "gib" => 1 << 30,
        "ti" | "tib" => 1 << 40,
        "pi" | "pib" => 1 << 50,
        "ei" | "eib" => 1 << 60,
        _ => return Err(invalid(format!("unknown unit '{}'", &caps[2]))),
    };

    number
        .checked_mul(factor)
        .ok_or_else(|| invalid("value overflows 64 bits".into()))
}
