//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the core library and the CLI MUST NOT call
//! sleep methods. Periodic wake-ups use `tokio::time::interval`, and every
//! wait is bounded by a timeout on the operation itself.
//! **Exceptions**: test code, sleeps driven by an interval

use architectural_enforcement::{
    code_part, is_interval_pattern, production_lines, production_sources, Violation,
};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Test code (after #[cfg(test)])");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops (use select! with a tick)");
        eprintln!("  - Sleep to 'wait' for a peer (use a timeout on the read)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<Violation> {
    let mut violations = Vec::new();

    for (path, content) in production_sources() {
        let lines = production_lines(&content);
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                continue;
            }
            if is_interval_pattern(&lines, idx) {
                continue;
            }
            violations.push(Violation {
                path: path.clone(),
                line: idx + 1,
                rule: "sleep call",
                code: line.trim().to_string(),
            });
        }
    }
    violations
}

#[test]
fn test_detector_flags_plain_sleep() {
    let lines = vec![
        "async fn wait_for_peer() {",
        "    tokio::time::sleep(Duration::from_millis(10)).await;",
        "}",
    ];
    assert!(code_part(lines[1]).contains("::sleep("));
    assert!(!is_interval_pattern(&lines, 1));
}

#[test]
fn test_detector_ignores_commented_sleep() {
    let line = "let x = 1; // tokio::time::sleep(d) would be wrong here";
    assert!(!code_part(line).contains("::sleep("));
}
