//! Injects PFD_VERSION and PFD_GIT_SHA at compile time.
//!
//! CI sets both; local builds fall back to CARGO_PKG_VERSION and
//! `git rev-parse`.

use std::process::Command;

fn main() {
    let version = env_nonempty("PFD_VERSION")
        .or_else(|| env_nonempty("CARGO_PKG_VERSION"))
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=PFD_VERSION={version}");

    let git_sha = env_nonempty("PFD_GIT_SHA")
        .or_else(|| env_nonempty("GITHUB_SHA").map(|s| s.chars().take(7).collect()))
        .or_else(git_rev_parse)
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=PFD_GIT_SHA={git_sha}");

    println!("cargo:rerun-if-env-changed=PFD_VERSION");
    println!("cargo:rerun-if-env-changed=PFD_GIT_SHA");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn git_rev_parse() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
