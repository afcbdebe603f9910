//! Embeds the git state into the binary for `catmin --version`.
//!
//! `GIT_HASH` is the short commit hash, empty outside a checkout.
//! `ON_RELEASE_TAG` is `true` only when HEAD carries the tag `v<package version>`.

use std::process::Command;

/// Trimmed stdout of a successful `git` call.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/tags");

    let hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_default();
    let release_tag = format!("v{}", env!("CARGO_PKG_VERSION"));
    let on_tag = git(&["tag", "--points-at", "HEAD"])
        .is_some_and(|tags| tags.lines().any(|tag| tag == release_tag));

    println!("cargo:rustc-env=GIT_HASH={hash}");
    println!("cargo:rustc-env=ON_RELEASE_TAG={on_tag}");
}
