#![allow(missing_docs)]

use std::process::Command;

fn main() {
    let cargo_version = env!("CARGO_PKG_VERSION");
    let version = match git_describe() {
        Some(rev) => format!("{cargo_version}+g{rev}"),
        None => cargo_version.to_string(),
    };
    println!("cargo:rustc-env=TCPBENCH_VERSION_STRING={version}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// Short hash of HEAD, or None outside a git checkout (e.g. a packaged crate)
fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!rev.is_empty()).then_some(rev)
}
