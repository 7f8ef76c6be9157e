//! Stamps `AQUALINK_BUILD_ID` as `YYYY.MM.DD+g<sha>` for the startup log.
//! The date is the commit date, so rebuilding one commit gives one id.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    // the repository root, not this crate's directory
    if let Some(git_dir) = git(&["rev-parse", "--absolute-git-dir"]) {
        println!("cargo:rerun-if-changed={git_dir}/HEAD");
        println!("cargo:rerun-if-changed={git_dir}/refs/heads");
    }

    let sha = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let date = git(&["log", "-1", "--format=%cd", "--date=format:%Y.%m.%d"])
        .unwrap_or_else(|| chrono::Utc::now().format("%Y.%m.%d").to_string());
    println!("cargo:rustc-env=AQUALINK_BUILD_ID={date}+g{sha}");
}
