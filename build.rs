//! Stamps the build with a version identifier for the startup log
//!
//! CARSHARE_BUILD_ID wins when set (container builds without .git);
//! otherwise the short commit hash, suffixed with -dirty for local edits.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output.status.success().then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=CARSHARE_BUILD_ID");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let build_id = std::env::var("CARSHARE_BUILD_ID").ok().filter(|id| !id.is_empty()).or_else(|| {
        let hash = git(&["rev-parse", "--short", "HEAD"])?;
        let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some_and(|s| !s.is_empty());
        Some(if dirty { format!("{hash}-dirty") } else { hash })
    });

    println!("cargo:rustc-env=GIT_HASH={}", build_id.as_deref().unwrap_or("unknown"));
}
