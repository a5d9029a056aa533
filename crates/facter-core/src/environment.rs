//! Process environment access.
//!
//! Thin wrappers over `std::env` plus [`ScopedEnv`], which sets one
//! variable for the lifetime of a guard and restores it on drop.
//!
//! The process environment is shared by every thread. Code holding a
//! [`ScopedEnv`] owns its variable until the guard is dropped; nothing
//! else may read or write that variable meanwhile.

use std::ffi::OsString;

/// Gets the value of an environment variable.
///
/// Returns `None` when the variable is unset or not valid unicode.
#[must_use]
pub fn get(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Sets an environment variable.
pub fn set(name: &str, value: &str) {
    std::env::set_var(name, value);
}

/// Removes an environment variable.
pub fn clear(name: &str) {
    std::env::remove_var(name);
}

/// Separator between entries of a path-list variable such as `PATH`.
#[must_use]
pub fn path_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

/// Splits a path-list value on [`path_separator`], dropping empty entries.
#[must_use]
pub fn split_paths(value: &str) -> Vec<String> {
    value
        .split(path_separator())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands `$NAME` and `${NAME}` references from the process environment.
///
/// Unset variables expand to the empty string. A `$` not followed by a
/// name, or an unterminated `${`, is kept literally.
#[must_use]
pub fn expand(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if is_name(&braced[..end]) => {
                    out.push_str(&get(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                _ => {
                    out.push('$');
                    rest = after;
                }
            }
            continue;
        }

        let len = after
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map_or(after.len(), |(i, _)| i);
        if len == 0 {
            out.push('$');
        } else {
            out.push_str(&get(&after[..len]).unwrap_or_default());
        }
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sets an environment variable until the guard is dropped.
///
/// On drop the previous value is restored, or the variable is removed if
/// it was not set before.
///
/// # Example
///
/// ```
/// use facter_core::ScopedEnv;
///
/// {
///     let _guard = ScopedEnv::new("FACTER_DOC_SCOPED", "on");
///     assert_eq!(std::env::var("FACTER_DOC_SCOPED").as_deref(), Ok("on"));
/// }
/// assert!(std::env::var("FACTER_DOC_SCOPED").is_err());
/// ```
#[derive(Debug)]
pub struct ScopedEnv {
    name: String,
    previous: Option<OsString>,
}

impl ScopedEnv {
    /// Records the current value of `name` and sets it to `value`.
    pub fn new(name: impl Into<String>, value: &str) -> Self {
        let name = name.into();
        let previous = std::env::var_os(&name);
        set(&name, value);
        Self { name, previous }
    }

    /// Name of the overridden variable.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        match &self.previous {
            Some(old) => std::env::set_var(&self.name, old),
            None => clear(&self.name),
        }
    }
}

/// Serializes tests that touch the process environment.
#[cfg(test)]
pub(crate) static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
