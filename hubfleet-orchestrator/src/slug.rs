//! Tenant slugs: DNS-safe labels derived from the contact address.

use std::future::Future;

pub const MAX_BASE_LEN: usize = 20;

/// Highest numeric suffix tried before giving up on a base.
pub const MAX_SUFFIX: u32 = 10_000;

/// Local part of `email`, lowercased, with every run of characters outside
/// `[a-z0-9]` collapsed to one hyphen, trimmed, and cut to [`MAX_BASE_LEN`].
/// Returns `None` when nothing usable is left.
pub fn slug_base(email: &str) -> Option<String> {
    let local = email.split('@').next().unwrap_or_default().to_lowercase();

    let mut out = String::with_capacity(local.len());
    let mut pending_hyphen = false;
    for c in local.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    out.truncate(MAX_BASE_LEN);
    // The cut can land right after a separator; a DNS label must not end with '-'.
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// First free candidate among `base`, `base-2`, `base-3`, ... as reported by
/// `is_taken`. Every candidate is checked afresh; nothing is cached.
pub async fn unique_slug<F, Fut, E>(base: &str, mut is_taken: F) -> Result<Option<String>, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    if !is_taken(base.to_string()).await? {
        return Ok(Some(base.to_string()));
    }
    for n in 2..=MAX_SUFFIX {
        let candidate = format!("{base}-{n}");
        if !is_taken(candidate.clone()).await? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
