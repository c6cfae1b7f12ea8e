//! Security invariant tests for the agentpay payment stack.
//!
//! Source-level checks over every production crate in the workspace. They
//! run on each `cargo test --workspace`, so a regression fails the build
//! instead of shipping.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// All .rs files under `crates/`, excluding tests and this crate.
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let mut files = Vec::new();
    for entry in WalkDir::new(root.join("crates"))
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("security-audit")
            || path_str.contains("tests/")
            || path_str.contains("\\tests\\")
        {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    files
}

/// Drop everything from the first `#[cfg(test)]` (or `mod tests`) on.
/// Heuristic: test modules sit at the bottom of the file.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();
    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            break;
        }
        result.push(line);
    }
    result.join("\n")
}

/// Strip doc comments, whose examples may legitimately unwrap.
fn code_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| {
            let t = l.trim_start();
            !t.starts_with("///") && !t.starts_with("//!") && !t.starts_with("//")
        })
        .map(|(i, l)| (i + 1, l))
        .collect()
}

fn file_named<'a>(files: &'a [(String, String)], suffix: &str) -> Option<&'a String> {
    files
        .iter()
        .find(|(path, _)| path.replace('\\', "/").ends_with(suffix))
        .map(|(_, content)| content)
}

#[test]
fn no_hardcoded_private_keys_in_production_code() {
    let hex_64_re = Regex::new(r"0x[a-fA-F0-9]{64}").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if let Some(mat) = hex_64_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count() + 1;
            panic!(
                "Potential hardcoded secret found at {}:{}: {}",
                path,
                line_num,
                mat.as_str()
            );
        }
    }
}

#[test]
fn money_code_never_uses_floats() {
    let float_re = Regex::new(r"\bf(32|64)\b|as f(32|64)").unwrap();
    let money_files = [
        "agentpay/src/amount.rs",
        "agentpay/src/split.rs",
        "agentpay/src/policy.rs",
        "agentpay/src/verifier.rs",
        "agentpay/src/client.rs",
        "agentpay/src/wire.rs",
    ];

    let files = production_source_files();
    for suffix in money_files {
        let Some(content) = file_named(&files, suffix) else {
            panic!("expected money module {suffix} to exist");
        };
        for (line_num, line) in code_lines(&production_lines(content)) {
            assert!(
                !float_re.is_match(line),
                "Floating point in money code at {}:{}: {}. Amounts are integer minor units.",
                suffix,
                line_num,
                line.trim()
            );
        }
    }
}

#[test]
fn payment_path_does_not_panic_on_errors() {
    let panic_re = Regex::new(r"\.unwrap\(\)|\.expect\(|panic!\(").unwrap();
    let payment_path = [
        "agentpay/src/verifier.rs",
        "agentpay/src/replay_store.rs",
        "agentpay/src/split.rs",
        "agentpay/src/policy.rs",
        "agentpay/src/challenge.rs",
        "agentpay/src/client.rs",
        "agentpay-server/src/middleware.rs",
    ];

    let files = production_source_files();
    for suffix in payment_path {
        let Some(content) = file_named(&files, suffix) else {
            panic!("expected payment module {suffix} to exist");
        };
        for (line_num, line) in code_lines(&production_lines(content)) {
            assert!(
                !panic_re.is_match(line),
                "Panicking call on the payment path at {}:{}: {}. Propagate the error instead.",
                suffix,
                line_num,
                line.trim()
            );
        }
    }
}

#[test]
fn http_clients_disable_redirects() {
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        for mat in builder_re.find_iter(&prod_content) {
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];
            assert!(
                redirect_re.is_match(builder_chain),
                "reqwest::Client::builder() at {} does not set redirect(Policy::none()). \
                 A redirect could send payment headers to another host.",
                path
            );
        }
    }
}

#[test]
fn constant_time_uses_subtle_crate() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if prod_content.contains("fn constant_time_eq") || prod_content.contains("fn verify_mac") {
            assert!(
                prod_content.contains("use subtle") || prod_content.contains("subtle::"),
                "File {} compares secrets without the subtle crate.",
                path
            );
        }
    }
}

#[test]
fn bearer_tokens_compared_in_constant_time() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if prod_content.contains("strip_prefix(\"Bearer \")") {
            assert!(
                prod_content.contains("constant_time_eq"),
                "Bearer token at {} must be checked with crypto::constant_time_eq.",
                path
            );
        }
    }
}

#[test]
fn error_responses_do_not_leak_internals() {
    let dangerous_patterns = [
        "RPC unreachable",
        "database error:",
        "stack trace",
        "RUST_BACKTRACE",
    ];

    for (path, content) in &production_source_files() {
        if !content.contains("HttpResponse::") {
            continue;
        }
        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            for pattern in &dangerous_patterns {
                if line.contains(pattern) && line.contains("json") {
                    panic!(
                        "Sensitive detail '{}' in an HTTP response at {}:{}. \
                         Log internals server-side only.",
                        pattern,
                        path,
                        i + 1
                    );
                }
            }
        }
    }
}

#[test]
fn server_offers_persistent_replay_store() {
    let files = production_source_files();
    let Some(main) = file_named(&files, "agentpay-server/src/main.rs") else {
        panic!("server entry point not found");
    };
    let prod_content = production_lines(main);
    assert!(
        prod_content.contains("SqliteReplayStore"),
        "The server must be able to persist consumed proofs across restarts."
    );
}

#[test]
fn memo_secret_is_mandatory() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        assert!(
            !prod_content.contains("memo_secret: Option<"),
            "Memo secret at {} is optional. Without it, challenges cannot be authenticated.",
            path
        );
        assert!(
            !prod_content.contains("secret: Option<Vec<u8>>"),
            "HMAC secret at {} is optional.",
            path
        );
    }
}
