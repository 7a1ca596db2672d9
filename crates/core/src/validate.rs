//! Cross-field option validation and unit parsing
//!
//! Checks that are not expressible in the flag layer: mutual exclusion of
//! naming flags, workspace-mode domains, worktree availability, and the
//! docker-style unit grammars for memory sizes, CPU fractions, and
//! block-IO weights. Everything here runs before any runtime mutation.

use crate::container::container_name;
use crate::errors::{Result, ValidationError};

/// Multiplier table for memory suffixes.
const MEMORY_UNITS: &[(char, i64)] = &[
    ('b', 1),
    ('k', 1024),
    ('m', 1024 * 1024),
    ('g', 1024 * 1024 * 1024),
    ('t', 1024_i64.pow(4)),
];

/// Parse a docker-style memory size: a number with an optional
/// case-insensitive `b`/`k`/`m`/`g`/`t` suffix. Bare numbers are bytes.
pub fn parse_memory_size(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty memory size".to_string()).into());
    }
    let (digits, multiplier) = match trimmed.chars().last() {
        Some(last) if last.is_ascii_alphabetic() => {
            let unit = last.to_ascii_lowercase();
            let multiplier = MEMORY_UNITS
                .iter()
                .find(|(suffix, _)| *suffix == unit)
                .map(|(_, m)| *m)
                .ok_or_else(|| {
                    invalid(format!(
                        "invalid memory suffix '{last}' in '{input}'. Supported: b, k, m, g, t"
                    ))
                })?;
            (&trimmed[..trimmed.len() - 1], multiplier)
        }
        _ => (trimmed, 1),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| invalid(format!("invalid memory size '{input}'")))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(format!("memory size '{input}' overflows")).into())
}

/// Parse a memory-swap value: `-1` means unlimited swap, anything else is
/// a memory size.
pub fn parse_memory_swap(input: &str) -> Result<i64> {
    if input.trim() == "-1" {
        return Ok(-1);
    }
    parse_memory_size(input)
}

/// Parse a fractional CPU count into NanoCPUs (`value × 10⁹`).
pub fn parse_cpus(input: &str) -> Result<i64> {
    let value: f64 = input
        .trim()
        .parse()
        .map_err(|_| invalid(format!("invalid CPU count '{input}'")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(format!("invalid CPU count '{input}'")).into());
    }
    Ok((value * 1e9).round() as i64)
}

/// Validate a block-IO weight: 0 (disabled) or 10–1000.
pub fn validate_blkio_weight(weight: u16) -> Result<u16> {
    if weight == 0 || (10..=1000).contains(&weight) {
        Ok(weight)
    } else {
        Err(invalid(format!(
            "blkio weight must be 0 (disabled) or between 10 and 1000, got {weight}"
        ))
        .into())
    }
}

/// Cross-field checks on naming and worktree flags, run before any
/// runtime mutation.
///
/// `--name` and `--agent` may coexist only when they compose to the same
/// container name.
pub fn validate_naming(
    project: &str,
    name: Option<&str>,
    agent: Option<&str>,
) -> Result<()> {
    if let (Some(name), Some(agent)) = (name, agent) {
        if name != container_name(project, agent) {
            return Err(ValidationError::ConflictingFlags {
                message: format!(
                    "--name '{name}' and --agent '{agent}' resolve to different containers; \
                     pass only one"
                ),
            }
            .into());
        }
    }
    Ok(())
}

/// `--worktree` requires a git-manager collaborator to be wired in.
pub fn validate_worktree_available(
    worktree: Option<&str>,
    provider_available: bool,
) -> Result<()> {
    if worktree.is_some() && !provider_available {
        return Err(ValidationError::InvalidValue {
            message: "--worktree requires git worktree support, which is not available here"
                .to_string(),
        }
        .into());
    }
    Ok(())
}

fn invalid(message: String) -> ValidationError {
    ValidationError::InvalidValue { message }
}
