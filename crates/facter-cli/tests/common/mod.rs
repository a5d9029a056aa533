//! Shared E2E test helpers for the `facter` binary.

use assert_cmd::cargo::cargo_bin_cmd;
use std::path::Path;
use std::time::Duration;

/// Default timeout for CLI runs.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Variables that would leak the caller's setup into a test run.
const ISOLATED_VARS: &[&str] = &[
    "FACTERLIB",
    "FACTER_LOG_LEVEL",
    "FACTER_NO_CUSTOM_FACTS",
    "FACTER_NO_EXTERNAL_FACTS",
    "RUST_LOG",
];

/// Builds a `facter` command with `HOME` pointed at `home`, so no global
/// config is picked up.
pub fn facter_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("facter");
    cmd.timeout(TIMEOUT);
    for var in ISOLATED_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home);
    cmd
}

/// Writes a plugin file into `dir`.
pub fn write_plugin(dir: &Path, name: &str, source: &str) {
    std::fs::write(dir.join(name), source).expect("write plugin file");
}
