//! Build script for simexec
//!
//! Embeds git state, build timestamp, target and compiler version as
//! `SIMEXEC_*` compile-time environment variables.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_output("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = git_dirty();
    let rustc_version = command_output("rustc", &["--version"]);
    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let vars = [
        ("SIMEXEC_GIT_HASH", git_hash),
        ("SIMEXEC_GIT_BRANCH", git_branch),
        ("SIMEXEC_GIT_DIRTY", git_dirty.to_string()),
        ("SIMEXEC_BUILD_TIMESTAMP", build_timestamp),
        ("SIMEXEC_TARGET", env_or_unknown("TARGET")),
        ("SIMEXEC_PROFILE", env_or_unknown("PROFILE")),
        ("SIMEXEC_RUSTC_VERSION", rustc_version),
        ("SIMEXEC_HOST", env_or_unknown("HOST")),
    ];
    for (key, value) in &vars {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

fn env_or_unknown(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "unknown".to_string())
}

/// Trimmed stdout of a successful command, or "unknown"
fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn git_dirty() -> &'static str {
    Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .map(|output| {
            if output.status.success() && !output.stdout.is_empty() {
                "true"
            } else {
                "false"
            }
        })
        .unwrap_or("unknown")
}
