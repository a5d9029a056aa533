//! Integration tests for the `Facter` namespace.
//!
//! Every test builds its own interpreter and bridge over a collection it
//! controls, with `package.path` pointed away from any system Lua tree.

use facter_core::{Collection, SharedCollection, Value as FactValue, VERSION};
use facter_lua::{Bridge, Interpreter};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

fn interpreter() -> Interpreter {
    let mut interpreter = Interpreter::new();
    interpreter.initialize().unwrap();
    interpreter
        .lua()
        .unwrap()
        .load(r#"package.path = "./?.lua""#)
        .exec()
        .unwrap();
    interpreter
}

fn linux_collection() -> SharedCollection {
    let mut collection = Collection::new();
    collection.add("kernel", FactValue::from("Linux"));
    collection.add("architecture", FactValue::from("x86_64"));
    Arc::new(Mutex::new(collection))
}

fn bridge_with(collection: SharedCollection, dirs: &[&Path]) -> Bridge {
    let paths = dirs.iter().map(|d| d.display().to_string()).collect();
    Bridge::new(&interpreter(), collection, paths).unwrap()
}

fn bridge() -> Bridge {
    bridge_with(linux_collection(), &[])
}

fn write_plugin(dir: &Path, name: &str, source: &str) {
    std::fs::write(dir.join(name), source).unwrap();
}

fn eval<T: mlua::FromLuaMulti>(bridge: &Bridge, code: &str) -> T {
    bridge.lua().load(code).eval::<T>().unwrap()
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&capture.0.lock()).to_string();
    (result, logs)
}

// =============================================================================
// Plugin loading
// =============================================================================

mod plugins {
    use super::*;

    #[test]
    fn memory_plugin_resolves_next_to_native_facts() {
        let dir = TempDir::new().unwrap();
        write_plugin(
            dir.path(),
            "memory.lua",
            r#"
            Facter.add("memory", function(r)
              r:setcode(function() return "4096" end)
            end)
            "#,
        );

        let bridge = bridge_with(linux_collection(), &[dir.path()]);
        assert_eq!(bridge.value("memory").unwrap(), Some(FactValue::from("4096")));

        let facts = bridge.to_hash().unwrap();
        assert_eq!(facts.get("memory"), Some(&FactValue::from("4096")));
        assert_eq!(facts.get("kernel"), Some(&FactValue::from("Linux")));
    }

    #[test]
    fn name_matched_files_load_from_every_directory_once() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        for dir in [first.path(), second.path()] {
            write_plugin(
                dir,
                "os.lua",
                r#"
                os_loads = (os_loads or 0) + 1
                Facter.add("os", function(r)
                  r:setcode(function() return {name = "Custom"} end)
                end)
                "#,
            );
        }

        let bridge = bridge_with(linux_collection(), &[first.path(), second.path()]);
        let found: bool = eval(&bridge, r#"return Facter.fact("os") ~= nil"#);
        assert!(found);
        assert_eq!(bridge.loaded_files().len(), 2);

        let found: bool = eval(&bridge, r#"return Facter.fact("OS") ~= nil"#);
        assert!(found);
        assert_eq!(bridge.loaded_files().len(), 2);
        assert_eq!(eval::<i64>(&bridge, "return os_loads"), 2);
    }

    #[test]
    fn index_lookup_skips_the_full_scan() {
        let dir = TempDir::new().unwrap();
        write_plugin(
            dir.path(),
            "uptime.lua",
            r#"Facter.add("uptime", {value = "3 days"})"#,
        );
        write_plugin(
            dir.path(),
            "extra.lua",
            r#"Facter.add("hidden", {value = "found"})"#,
        );

        let bridge = bridge_with(linux_collection(), &[dir.path()]);
        let missing: bool = eval(&bridge, "return Facter.vaule == nil");
        assert!(missing);
        assert!(bridge.loaded_files().is_empty());

        let uptime: String = eval(&bridge, r#"return Facter["uptime"]:value()"#);
        assert_eq!(uptime, "3 days");
        let kernel: String = eval(&bridge, r#"return Facter["kernel"]:value()"#);
        assert_eq!(kernel, "Linux");
        let names: Vec<String> = bridge
            .loaded_files()
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["uptime.lua".to_string()]);

        let hidden: bool = eval(&bridge, r#"return Facter["hidden"] == nil"#);
        assert!(hidden);
        let hidden: String = eval(&bridge, r#"return Facter.fact("hidden"):value()"#);
        assert_eq!(hidden, "found");
        assert_eq!(bridge.loaded_files().len(), 2);
    }

    #[test]
    fn plugin_runs_at_most_once() {
        let dir = TempDir::new().unwrap();
        write_plugin(
            dir.path(),
            "counted.lua",
            r#"
            counted_loads = (counted_loads or 0) + 1
            Facter.add("counted", {value = "yes"})
            "#,
        );

        let bridge = bridge_with(linux_collection(), &[dir.path()]);
        let value: String = eval(
            &bridge,
            r#"
            Facter.value("counted")
            Facter.loadfacts()
            Facter.value("counted")
            return Facter.value("counted")
            "#,
        );
        assert_eq!(value, "yes");
        assert_eq!(eval::<i64>(&bridge, "return counted_loads"), 1);
    }

    #[test]
    fn broken_plugin_is_logged_and_skipped() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "broken.lua", "Facter.add(\"broken\", function(r)");
        write_plugin(dir.path(), "good.lua", r#"Facter.add("good", {value = 1})"#);

        let bridge = bridge_with(linux_collection(), &[dir.path()]);
        let (facts, logs) = capture_logs(|| bridge.to_hash().unwrap());

        assert_eq!(facts.get("good"), Some(&FactValue::Integer(1)));
        assert!(!facts.contains_key("broken"));
        assert!(logs.contains("error while resolving custom facts in"));
        assert!(logs.contains("broken.lua"));
    }

    #[test]
    fn missing_search_path_is_dropped() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let bridge = bridge_with(linux_collection(), &[dir.path(), &missing]);

        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(bridge.search_paths(), vec![expected]);
    }

    #[test]
    fn search_adds_directories_at_runtime() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "late.lua", r#"Facter.add("late", {value = "found"})"#);

        let bridge = bridge();
        let path = dir.path().display().to_string();
        bridge
            .lua()
            .load(format!("Facter.search({path:?}, 42)"))
            .exec()
            .unwrap();

        let recorded: Vec<String> = eval(&bridge, "return Facter.search_path()");
        assert_eq!(recorded, vec![path]);
        assert_eq!(bridge.value("late").unwrap(), Some(FactValue::from("found")));
    }
}

// =============================================================================
// Facts and resolutions
// =============================================================================

mod facts {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let bridge = bridge();
        let value: String = eval(
            &bridge,
            r#"
            Facter.add("Foo", {value = "bar"})
            return Facter.value("foo")
            "#,
        );
        assert_eq!(value, "bar");
        assert_eq!(bridge.value("FOO").unwrap(), Some(FactValue::from("bar")));
    }

    #[test]
    fn confine_picks_the_suitable_resolution() {
        let bridge = bridge();
        let value: String = eval(
            &bridge,
            r#"
            Facter.add("family", {weight = 100}, function(r)
              r:confine("kernel", "Darwin")
              r:setcode(function() return "mac" end)
            end)
            Facter.add("family", function(r)
              r:confine({kernel = {"freebsd", "linux"}})
              r:setcode(function() return "linux" end)
            end)
            return Facter.value("family")
            "#,
        );
        assert_eq!(value, "linux");
    }

    #[test]
    fn higher_weight_wins() {
        let bridge = bridge();
        let value: String = eval(
            &bridge,
            r#"
            Facter.add("ranked", {value = "low"})
            Facter.add("ranked", {value = "high", weight = 10})
            return Facter.value("ranked")
            "#,
        );
        assert_eq!(value, "high");
    }

    #[test]
    fn failing_resolution_falls_back_to_native_value() {
        let bridge = bridge();
        let (value, logs) = capture_logs(|| {
            eval::<String>(
                &bridge,
                r#"
                Facter.add("kernel", function(r)
                  r:setcode(function() error("boom") end)
                end)
                return Facter.value("kernel")
                "#,
            )
        });
        assert_eq!(value, "Linux");
        assert!(logs.contains("error while resolving custom fact \"kernel\""));
        assert!(logs.contains("boom"));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let bridge = bridge();
        let (value, logs) = capture_logs(|| {
            bridge
                .lua()
                .load(
                    r#"
                    Facter.add("loop", function(r)
                      r:setcode(function() return Facter.value("loop") end)
                    end)
                    "#,
                )
                .exec()
                .unwrap();
            bridge.value("loop").unwrap()
        });
        assert_eq!(value, None);
        assert!(logs.contains("cycle detected"));
    }

    #[test]
    fn aggregate_resolution_merges_chunks() {
        let bridge = bridge();
        bridge
            .lua()
            .load(
                r#"
                Facter.add("interfaces", {type = "aggregate"}, function(r)
                  r:chunk("lo", function() return {"lo"} end)
                  r:chunk("eth", function() return {"eth0", "eth1"} end)
                end)
                "#,
            )
            .exec()
            .unwrap();

        assert_eq!(
            bridge.value("interfaces").unwrap(),
            Some(FactValue::Array(vec![
                FactValue::from("lo"),
                FactValue::from("eth0"),
                FactValue::from("eth1"),
            ]))
        );
    }

    #[test]
    fn invalid_option_fails_the_definition() {
        let bridge = bridge();
        let message: String = eval(
            &bridge,
            r#"
            local ok, err = pcall(Facter.add, "bad", {colour = "red"})
            assert(not ok)
            return tostring(err)
            "#,
        );
        assert!(message.contains("invalid resolution option \"colour\""));
    }

    #[test]
    fn failed_add_forgets_the_cached_value() {
        let bridge = bridge();
        let (ok, cached, recomputed): (bool, String, String) = eval(
            &bridge,
            r#"
            release = "1.0"
            Facter.add("release", function(r)
              r:setcode(function() return release end)
            end)
            local cached = Facter.value("release")
            release = "2.0"
            local ok = pcall(Facter.add, "release", function() error("broken block") end)
            return ok, cached, Facter.value("release")
            "#,
        );
        assert!(!ok);
        assert_eq!(cached, "1.0");
        assert_eq!(recomputed, "2.0");
    }

    #[test]
    fn define_fact_then_reset() {
        let bridge = bridge();
        let (before, after): (bool, bool) = eval(
            &bridge,
            r#"
            Facter.define_fact("ephemeral", function(f)
              assert(f:name() == "ephemeral")
            end)
            local before = Facter.fact("ephemeral") ~= nil
            Facter.reset()
            return before, Facter.fact("ephemeral") ~= nil
            "#,
        );
        assert!(before);
        assert!(!after);
    }

    #[test]
    fn flush_runs_on_flush_blocks() {
        let bridge = bridge();
        let flushed: i64 = eval(
            &bridge,
            r#"
            flushed = 0
            Facter.add("volatile", function(r)
              r:setcode(function() return "x" end)
              r:on_flush(function() flushed = flushed + 1 end)
            end)
            Facter.value("volatile")
            Facter.flush()
            return flushed
            "#,
        );
        assert_eq!(flushed, 1);
    }

    #[test]
    fn index_metamethod_returns_fact() {
        let bridge = bridge();
        let value: i64 = eval(
            &bridge,
            r#"
            Facter.add("indexed", {value = 7})
            return Facter["indexed"]:value()
            "#,
        );
        assert_eq!(value, 7);
        let missing: bool = eval(&bridge, r#"return Facter["nope"] == nil"#);
        assert!(missing);
    }
}

// =============================================================================
// Namespace
// =============================================================================

mod namespace {
    use super::*;

    #[test]
    fn version_matches_crate() {
        let bridge = bridge();
        let version: String = eval(&bridge, "return Facter.version()");
        assert_eq!(version, VERSION);
        let constant: String = eval(&bridge, "return Facter.FACTERVERSION");
        assert_eq!(constant, VERSION);
    }

    #[test]
    fn wrong_argument_count_is_reported() {
        let bridge = bridge();
        let message: String = eval(
            &bridge,
            r#"
            local ok, err = pcall(Facter.value)
            return tostring(err)
            "#,
        );
        assert!(message.contains("wrong number of arguments to Facter.value (0 for 1)"));
    }

    #[test]
    fn non_string_fact_name_is_rejected() {
        let bridge = bridge();
        let ok: bool = eval(&bridge, "return (pcall(Facter.value, 42))");
        assert!(!ok);
    }

    #[test]
    fn execution_module_is_frozen() {
        let bridge = bridge();
        let (ok, message, meta): (bool, String, bool) = eval(
            &bridge,
            r#"
            local ok, err = pcall(function() Facter.Core.Execution.which = nil end)
            return ok, tostring(err), getmetatable(Facter.Core.Execution)
            "#,
        );
        assert!(!ok);
        assert!(message.contains("frozen"));
        assert!(!meta);
    }

    #[test]
    fn require_returns_host_namespace() {
        let bridge = bridge();
        let same: bool = eval(&bridge, r#"return require("facter") == Facter"#);
        assert!(same);
    }

    #[test]
    fn to_hash_and_each() {
        let bridge = bridge();
        let (count, seen): (i64, i64) = eval(
            &bridge,
            r#"
            Facter.add("zzz", {value = "last"})
            local hash = Facter.to_hash()
            local count = 0
            for _ in pairs(hash) do count = count + 1 end
            local seen = 0
            Facter.each(function(name, value)
              seen = seen + 1
              return false
            end)
            return count, seen
            "#,
        );
        assert_eq!(count, 3);
        assert_eq!(seen, 1);
    }

    #[test]
    fn teardown_restores_previous_global() {
        let interpreter = interpreter();
        let lua = interpreter.lua().unwrap().clone();
        lua.globals().set("Facter", "previous").unwrap();

        let bridge = Bridge::new(&interpreter, linux_collection(), Vec::new()).unwrap();
        let defined: bool = eval(&bridge, "return type(Facter) == 'table'");
        assert!(defined);
        drop(bridge);

        let restored: String = lua.globals().get("Facter").unwrap();
        assert_eq!(restored, "previous");
    }

    #[test]
    fn uninitialized_interpreter_is_rejected() {
        let err = Bridge::new(&Interpreter::new(), linux_collection(), Vec::new()).unwrap_err();
        assert!(matches!(err, facter_lua::BridgeError::RuntimeUnavailable));
    }
}

// =============================================================================
// Logging
// =============================================================================

mod logging {
    use super::*;

    #[test]
    fn debugonce_logs_once_and_debug_every_time() {
        let bridge = bridge();
        let ((), logs) = capture_logs(|| {
            bridge
                .lua()
                .load(
                    r#"
                    Facter.debugonce("once-only")
                    Facter.debugonce("once-only")
                    Facter.debug("every-time")
                    Facter.debug("every-time")
                    Facter.warnonce("warned")
                    Facter.warnonce("warned")
                    "#,
                )
                .exec()
                .unwrap();
        });
        assert_eq!(logs.matches("once-only").count(), 1);
        assert_eq!(logs.matches("every-time").count(), 2);
        assert_eq!(logs.matches("warned").count(), 1);
        assert!(logs.contains("facter::lua"));
    }

    #[test]
    fn log_exception_uses_custom_message() {
        let bridge = bridge();
        let ((), logs) = capture_logs(|| {
            bridge
                .lua()
                .load(
                    r#"
                    local ok, err = pcall(error, "underlying")
                    Facter.log_exception(err, "custom message")
                    Facter.log_exception(err)
                    "#,
                )
                .exec()
                .unwrap();
        });
        assert!(logs.contains("custom message."));
        assert!(logs.contains("underlying."));
    }
}

// =============================================================================
// Command execution
// =============================================================================

#[cfg(unix)]
mod execution {
    use super::*;

    #[test]
    fn execute_returns_trimmed_output() {
        let bridge = bridge();
        let output: String = eval(&bridge, r#"return Facter.Core.Execution.execute("echo hi")"#);
        assert_eq!(output, "hi");
    }

    #[test]
    fn execute_on_fail_default() {
        let bridge = bridge();
        let output: String = eval(
            &bridge,
            r#"return Facter.Core.Execution.execute("false", {on_fail = "default"})"#,
        );
        assert_eq!(output, "default");

        let missing: bool = eval(
            &bridge,
            r#"return Facter.Core.Execution.execute("false", {}) == nil"#,
        );
        assert!(missing);
    }

    #[test]
    fn execute_on_fail_raise() {
        let bridge = bridge();
        let message: String = eval(
            &bridge,
            r#"
            local ok, err = pcall(Facter.Core.Execution.execute, "false", {on_fail = "raise"})
            assert(not ok)
            return tostring(err)
            "#,
        );
        assert!(message.contains("execution of command \"false\" failed"));
    }

    #[test]
    fn exec_raises_on_failure() {
        let bridge = bridge();
        let ok: bool = eval(
            &bridge,
            r#"return (pcall(Facter.Core.Execution.exec, "definitely-not-a-command-xyz"))"#,
        );
        assert!(!ok);
    }

    #[test]
    fn stderr_is_merged() {
        let bridge = bridge();
        let output: String = eval(
            &bridge,
            r#"return Facter.Core.Execution.execute("echo oops 1>&2")"#,
        );
        assert_eq!(output, "oops");
    }

    #[test]
    fn which_resolves_executables() {
        let bridge = bridge();
        let found: bool = eval(&bridge, r#"return Facter.Core.Execution.which("sh") ~= nil"#);
        assert!(found);
        let missing: bool = eval(
            &bridge,
            r#"return Facter.Core.Execution.which("definitely-not-a-command-xyz") == nil"#,
        );
        assert!(missing);
    }

    #[test]
    fn setcode_command_string() {
        let bridge = bridge();
        bridge
            .lua()
            .load(r#"Facter.add("greeting", function(r) r:setcode("echo hello") end)"#)
            .exec()
            .unwrap();
        assert_eq!(bridge.value("greeting").unwrap(), Some(FactValue::from("hello")));
    }
}
