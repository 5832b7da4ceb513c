//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Sockets are always `tokio::net`, and async code never touches
//! `std::fs`. Plain `std::net` address types are fine.
//! **Acceptable**: `std::fs` in non-async functions (configuration loading
//! before the services start), test code

use architectural_enforcement::{
    code_part, is_in_async_function, production_lines, production_sources, Violation,
};

const BLOCKING_SOCKETS: &[&str] = &[
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::net::UdpSocket",
];

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener, std::net::UdpSocket");
        eprintln!("  - std::fs::* inside async fn or async blocks");
        eprintln!("  - std::io::stdin() inside async fn");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::net::TcpStream::connect().await");
        eprintln!("  - tokio::io::AsyncReadExt, tokio::io::AsyncWriteExt");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<Violation> {
    let mut violations = Vec::new();

    for (path, content) in production_sources() {
        let lines = production_lines(&content);
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            let mut flag = |rule| {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    rule,
                    code: line.trim().to_string(),
                });
            };

            if BLOCKING_SOCKETS.iter().any(|needle| code.contains(needle))
                || (code.contains("use std::net::{")
                    && ["TcpStream", "TcpListener", "UdpSocket"]
                        .iter()
                        .any(|name| code.contains(name)))
            {
                flag("blocking socket");
            }

            if code.contains("std::fs::") && is_in_async_function(&lines, idx) {
                flag("blocking file I/O in async code");
            }

            if code.contains("std::io::stdin()") && is_in_async_function(&lines, idx) {
                flag("blocking stdin in async code");
            }
        }
    }
    violations
}

#[test]
fn test_detector_allows_address_types() {
    let code = code_part("use std::net::{Ipv4Addr, SocketAddr};");
    assert!(!BLOCKING_SOCKETS.iter().any(|needle| code.contains(needle)));
}

#[test]
fn test_detector_flags_async_file_read() {
    let lines = vec![
        "pub async fn load() -> Result<String> {",
        "    let text = std::fs::read_to_string(path)?;",
        "}",
    ];
    assert!(code_part(lines[1]).contains("std::fs::"));
    assert!(is_in_async_function(&lines, 1));
}
