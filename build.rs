use std::process::Command;

fn main() {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output();
    let git_hash = match output {
        Ok(o) if o.status.success() => String::from_utf8(o.stdout)
            .map(|hash| hash.trim().to_string())
            .unwrap_or_else(|_| String::from("NOCOMMITHASH")),
        _ => String::from("NOCOMMITHASH"),
    };
    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
}
