//! Integration Test: Async Discipline in the Gateway Core
//!
//! **Policy**: Production code in the gateway core runs inside the Tokio
//! runtime and is shared across tasks. It MUST NOT block a worker thread or
//! panic on a recoverable error.
//!
//! Test modules (everything after the first `#[cfg(test)]` of a file) and
//! test-only files are exempt.

use std::fs;
use std::path::{Path, PathBuf};

use architectural_enforcement::{SCANNED_ROOTS, TEST_ONLY_FILES};

struct Rule {
    needle: &'static str,
    reason: &'static str,
}

const BLOCKING_RULES: &[Rule] = &[
    Rule {
        needle: "std::thread::sleep",
        reason: "Blocking sleep (use tokio::time::sleep)",
    },
    Rule {
        needle: "thread::sleep(",
        reason: "Blocking sleep (use tokio::time::sleep)",
    },
    Rule {
        needle: "std::sync::Mutex",
        reason: "std mutex (use parking_lot::Mutex or tokio::sync::Mutex)",
    },
    Rule {
        needle: "std::sync::RwLock",
        reason: "std rwlock (use parking_lot::RwLock or tokio::sync::RwLock)",
    },
];

const PANIC_RULES: &[Rule] = &[
    Rule {
        needle: ".unwrap()",
        reason: "unwrap() in production code (propagate with ?)",
    },
    Rule {
        needle: ".expect(",
        reason: "expect() in production code (propagate with ?)",
    },
];

#[test]
fn test_no_blocking_calls_in_production_code() {
    let violations = scan(BLOCKING_RULES);

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking calls found in gateway production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nFound {} blocking call(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_no_panicking_unwraps_in_production_code() {
    let violations = scan(PANIC_RULES);

    if !violations.is_empty() {
        eprintln!("\n❌ Panicking error handling found in gateway production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "\nFound {} unwrap/expect call(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_scanned_roots_exist() {
    for root in SCANNED_ROOTS {
        assert!(
            package_dir().join(root).is_dir(),
            "scanned root {root} does not exist"
        );
    }
}

fn package_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn scan(rules: &[Rule]) -> Vec<String> {
    let mut violations = Vec::new();

    for root in SCANNED_ROOTS {
        for entry in walkdir::WalkDir::new(package_dir().join(root))
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
            if TEST_ONLY_FILES.contains(&file_name) {
                continue;
            }
            check_file(path, rules, &mut violations);
        }
    }

    violations
}

fn check_file(path: &Path, rules: &[Rule], violations: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        let code_part = line.split("//").next().unwrap_or(line);
        for rule in rules {
            if code_part.contains(rule.needle) {
                violations.push(format!(
                    "{}:{} - {}: {}",
                    path.display(),
                    idx + 1,
                    rule.reason,
                    line.trim()
                ));
            }
        }
    }
}

#[test]
fn test_rules_ignore_fallible_helpers() {
    let line = "let n = value.parse().unwrap_or_default(); let m = x.unwrap_or(1);";
    assert!(!PANIC_RULES.iter().any(|rule| line.contains(rule.needle)));
    assert!(PANIC_RULES.iter().any(|rule| "x.unwrap()".contains(rule.needle)));
}
