#![allow(dead_code)]

use std::{fs, path::Path, process::Command};

use annexport_domain::AnnexKey;

pub fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn init_repo(repo: &Path) {
    fs::create_dir_all(repo).expect("create repo dir");
    git(repo, &["init", "-q"]);
    git(repo, &["config", "user.email", "exporter@example.com"]);
    git(repo, &["config", "user.name", "Exporter"]);
    git(repo, &["config", "commit.gpgsign", "false"]);
}

pub fn commit_all(repo: &Path, message: &str) -> String {
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", message]);
    git(repo, &["rev-parse", "HEAD"]).trim().to_string()
}

pub fn write_file(repo: &Path, rel: &str, contents: &[u8]) {
    let path = repo.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write file");
}

/// Track `rel` as a pointer and drop the real bytes into the local store at
/// the mixed-convention location.
pub fn annex_file(repo: &Path, rel: &str, contents: &[u8], digest: &str) -> AnnexKey {
    let key =
        AnnexKey::parse(&format!("SHA256E-s{}--{digest}", contents.len())).expect("valid key");
    write_file(repo, rel, format!("/annex/objects/{key}\n").as_bytes());
    let dir = repo
        .join(".git")
        .join("annex")
        .join("objects")
        .join(key.hash_dir_mixed())
        .join(key.as_str());
    fs::create_dir_all(&dir).expect("create object dir");
    fs::write(dir.join(key.as_str()), contents).expect("write content");
    key
}
