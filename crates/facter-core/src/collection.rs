//! Native fact storage.
//!
//! A [`Collection`] maps lower-cased fact names to [`Value`]s. It is filled
//! from two sources before plugins see it:
//!
//! - default facts computed in-process ([`Collection::add_default_facts`])
//! - external fact files ([`Collection::add_external_facts`]): every
//!   `*.json` file (a JSON object, one fact per key) and every `*.txt`
//!   file (`name=value` lines) in each external directory
//!
//! Iteration is in name order.

use crate::environment;
use crate::error::CoreError;
use crate::value::Value;
use crate::VERSION;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Collection shared between the host and the Lua bridge.
pub type SharedCollection = Arc<parking_lot::Mutex<Collection>>;

/// Fact name to value map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    facts: BTreeMap<String, Value>,
}

impl Collection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a new empty collection for sharing.
    #[must_use]
    pub fn shared() -> SharedCollection {
        Arc::new(parking_lot::Mutex::new(Self::new()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Adds or replaces a fact. The name is lower-cased.
    pub fn add(&mut self, name: &str, value: Value) {
        self.facts.insert(name.to_lowercase(), value);
    }

    /// Removes a fact, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.facts.remove(&name.to_lowercase())
    }

    /// Looks up a fact by name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.facts.get(&name.to_lowercase())
    }

    /// Visits facts in name order until `f` returns `false`.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Value) -> bool,
    {
        for (name, value) in &self.facts {
            if !f(name, value) {
                break;
            }
        }
    }

    /// Fact names in iteration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.facts.keys().cloned().collect()
    }

    /// Removes every fact.
    pub fn clear(&mut self) {
        self.facts.clear();
    }

    /// Adds the facts every host provides.
    pub fn add_default_facts(&mut self) {
        let kernel = kernel_name();
        let arch = std::env::consts::ARCH;

        self.add("facterversion", Value::from(VERSION));
        self.add("kernel", Value::from(kernel));
        self.add("architecture", Value::from(arch));

        let mut os = BTreeMap::new();
        os.insert(
            "family".to_string(),
            Value::from(std::env::consts::FAMILY),
        );
        os.insert("name".to_string(), Value::from(kernel));
        os.insert("architecture".to_string(), Value::from(arch));
        self.add("os", Value::Map(os));

        if let Some(path) = environment::get("PATH") {
            self.add("path", Value::from(path));
        }
    }

    /// Adds facts from the files in each external directory.
    ///
    /// Missing directories are skipped. A file that cannot be read or
    /// parsed is logged and skipped; the remaining files still load.
    pub fn add_external_facts(&mut self, directories: &[String]) {
        for directory in directories {
            let dir = Path::new(directory);
            if !dir.is_dir() {
                debug!(path = %dir.display(), "external fact directory not found");
                continue;
            }

            for file in external_files(dir) {
                match parse_external_file(&file) {
                    Ok(facts) => {
                        debug!(path = %file.display(), count = facts.len(), "loaded external facts");
                        for (name, value) in facts {
                            self.add(&name, value);
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping external fact file"),
                }
            }
        }
    }
}

fn kernel_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "windows",
        "freebsd" => "FreeBSD",
        "openbsd" => "OpenBSD",
        "netbsd" => "NetBSD",
        "solaris" | "illumos" => "SunOS",
        other => other,
    }
}

fn external_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("json" | "txt")
                )
        })
        .collect();
    files.sort();
    files
}

fn parse_external_file(path: &Path) -> Result<Vec<(String, Value)>, CoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| CoreError::ExternalRead {
        path: path.to_path_buf(),
        source,
    })?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| CoreError::external_parse(path, e.to_string()))?;
            match value {
                Value::Map(map) => Ok(map.into_iter().collect()),
                _ => Err(CoreError::external_parse(path, "expected a JSON object")),
            }
        }
        _ => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let (name, value) = line.split_once('=').ok_or_else(|| {
                    CoreError::external_parse(path, format!("expected name=value, got '{line}'"))
                })?;
                Ok((name.trim().to_string(), Value::from(value.trim())))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_lower_cases_names() {
        let mut facts = Collection::new();
        facts.add("OperatingSystem", Value::from("Linux"));
        assert_eq!(facts.get("operatingsystem"), Some(&Value::from("Linux")));
        assert_eq!(facts.get("OPERATINGSYSTEM"), Some(&Value::from("Linux")));
        assert_eq!(facts.names(), vec!["operatingsystem"]);
    }

    #[test]
    fn remove_and_clear() {
        let mut facts = Collection::new();
        facts.add("a", Value::from(1_i64));
        facts.add("b", Value::from(2_i64));
        assert_eq!(facts.remove("A"), Some(Value::from(1_i64)));
        assert_eq!(facts.len(), 1);
        facts.clear();
        assert!(facts.is_empty());
    }

    #[test]
    fn each_stops_when_callback_returns_false() {
        let mut facts = Collection::new();
        for name in ["a", "b", "c"] {
            facts.add(name, Value::from(name));
        }
        let mut seen = Vec::new();
        facts.each(|name, _| {
            seen.push(name.to_string());
            name != "b"
        });
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn default_facts_are_present() {
        let mut facts = Collection::new();
        facts.add_default_facts();

        assert_eq!(facts.get("facterversion"), Some(&Value::from(VERSION)));
        assert!(facts.get("kernel").is_some());
        let os = facts.get("os").expect("os fact");
        assert_eq!(
            os.lookup("family"),
            Some(&Value::from(std::env::consts::FAMILY))
        );
        assert_eq!(
            os.lookup("architecture"),
            facts.get("architecture")
        );
    }

    #[test]
    fn external_json_and_txt_facts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("site.json"),
            r#"{"Datacenter": "east", "rack": {"row": 4}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("role.txt"),
            "# comment\nrole = web\n\nTier=frontend\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.yaml"), "a: b").unwrap();

        let mut facts = Collection::new();
        facts.add_external_facts(&[dir.path().to_string_lossy().into_owned()]);

        assert_eq!(facts.get("datacenter"), Some(&Value::from("east")));
        assert_eq!(
            facts.get("rack").and_then(|v| v.lookup("row")),
            Some(&Value::Integer(4))
        );
        assert_eq!(facts.get("role"), Some(&Value::from("web")));
        assert_eq!(facts.get("tier"), Some(&Value::from("frontend")));
        assert_eq!(facts.len(), 4);
    }

    #[test]
    fn bad_external_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a_bad.json"), "[1, 2]").unwrap();
        std::fs::write(dir.path().join("b_bad.txt"), "no separator").unwrap();
        std::fs::write(dir.path().join("c_good.txt"), "zone=blue").unwrap();

        let mut facts = Collection::new();
        facts.add_external_facts(&[
            dir.path().to_string_lossy().into_owned(),
            "/nonexistent/facts.d".to_string(),
        ]);

        assert_eq!(facts.names(), vec!["zone"]);
    }
}
