use std::env;
use std::process::Command;

/// Packagers building from a source tarball have no `.git`; they can pass
/// the revision through this variable instead.
const SHA_OVERRIDE: &str = "EXIM_EXPORTER_GIT_SHA";

fn git_sha() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let sha = String::from_utf8(out.stdout).ok()?;
    Some(sha.trim().to_string())
}

fn main() {
    let sha = env::var(SHA_OVERRIDE)
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(git_sha)
        .unwrap_or_else(|| "unknown".into());

    println!("cargo:rustc-env=GIT_SHA={sha}");

    println!("cargo:rerun-if-env-changed={SHA_OVERRIDE}");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs/");
}
