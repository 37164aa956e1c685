#![allow(dead_code)]

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::Command,
};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use annexport_core::AnnexKey;

/// Run git in `repo`, panicking on failure; fixture setup only.
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

/// A key in the extension-preserving backend's shape; the digest part is
/// fabricated, which the export pipeline never notices because content is
/// addressed purely by key string.
pub fn make_key(contents: &[u8], digest: &str) -> AnnexKey {
    AnnexKey::parse(&format!("SHA256E-s{}--{digest}", contents.len())).expect("valid key")
}

/// Track `rel` as a pointer file referencing `key`.
pub fn write_pointer(repo: &Path, rel: &str, key: &AnnexKey) {
    write_file(repo, rel, format!("/annex/objects/{key}\n").as_bytes());
}

/// Drop real content into the repository's annex object store at the
/// mixed-convention location, with the given permission bits.
pub fn place_content(repo: &Path, key: &AnnexKey, contents: &[u8], mode: u32) -> PathBuf {
    let dir = repo
        .join(".git")
        .join("annex")
        .join("objects")
        .join(key.hash_dir_mixed())
        .join(key.as_str());
    fs::create_dir_all(&dir).expect("create object dir");
    let path = dir.join(key.as_str());
    fs::write(&path, contents).expect("write content");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("set mode");
    }
    #[cfg(not(unix))]
    let _ = mode;
    path
}

/// One decoded tar entry: name, type, mode bits, content.
pub struct TarEntry {
    pub name: String,
    pub kind: EntryType,
    pub mode: u32,
    pub data: Vec<u8>,
}

/// Decode a tar.gz byte stream, returning the pax global comment (if any)
/// and all remaining entries in order.
pub fn read_targz(bytes: &[u8]) -> (Option<String>, Vec<TarEntry>) {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut comment = None;
    let mut entries = Vec::new();
    for entry in archive.entries().expect("tar entries") {
        let mut entry = entry.expect("tar entry");
        let kind = entry.header().entry_type();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("entry data");
        if kind == EntryType::XGlobalHeader {
            comment = pax_value(&data, "comment");
            continue;
        }
        entries.push(TarEntry {
            name: String::from_utf8(entry.path_bytes().into_owned()).expect("utf-8 name"),
            kind,
            mode: entry.header().mode().expect("mode"),
            data,
        });
    }
    (comment, entries)
}

/// Extract one record value from pax extended-header data.
fn pax_value(data: &[u8], wanted: &str) -> Option<String> {
    let text = std::str::from_utf8(data).ok()?;
    for record in text.split_terminator('\n') {
        let (_, rest) = record.split_once(' ')?;
        let (key, value) = rest.split_once('=')?;
        if key == wanted {
            return Some(value.to_string());
        }
    }
    None
}

/// Regular-file entries only, with any leading prefix intact.
pub fn file_entries(entries: &[TarEntry]) -> Vec<&TarEntry> {
    entries
        .iter()
        .filter(|entry| entry.kind == EntryType::Regular)
        .collect()
}
