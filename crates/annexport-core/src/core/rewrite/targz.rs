use std::{
    collections::HashSet,
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::{write::GzEncoder, Compression};
use tar::{Archive, Builder, Entry, EntryType, Header};
use tracing::{debug, trace};

use annexport_domain::CommitId;

use crate::core::annex::{AnnexResolver, AnnexedContent};
use crate::core::rewrite::RewriteStats;

/// Streaming flow: single pass over the base archive, substituting annexed
/// entries in place.
///
/// The source is consumed incrementally (a concurrently running producer can
/// stream through a pipe); after the last entry the remaining trailer bytes
/// are drained so the producer is never left blocked on a full pipe. The
/// commit id is recorded exactly once as a pax global `comment` record, and
/// any comment record the producer emitted is dropped in its favor.
///
/// # Errors
///
/// Returns an error when the base archive is malformed, a resolved content
/// path cannot be opened, or writing/finalizing the output fails. The tar and
/// gzip writers release on every exit path, so emitted bytes stay a
/// structurally bounded stream even on failure.
pub fn rewrite_streaming<R: Read, W: Write>(
    source: R,
    target: W,
    resolver: &mut dyn AnnexResolver,
    prefix: &str,
    commit: &CommitId,
) -> Result<RewriteStats> {
    let gzip = GzEncoder::new(target, Compression::default());
    let mut out = Builder::new(gzip);
    write_global_comment(&mut out, commit)?;

    let mut archive = Archive::new(source);
    let mut stats = RewriteStats::default();
    for entry in archive.entries().context("reading base archive")? {
        let mut entry = entry.context("reading base archive entry")?;
        let kind = entry.header().entry_type();
        if kind == EntryType::XGlobalHeader {
            continue;
        }
        let name = entry_name(&entry)?;
        let tracked = name.strip_prefix(prefix).unwrap_or(&name).to_string();

        if matches!(kind, EntryType::Regular | EntryType::Symlink) {
            if let Some(content) = resolver
                .resolve(&tracked)
                .with_context(|| format!("resolving {tracked}"))?
            {
                trace!(path = %tracked, key = %content.key, "substituting store content");
                append_store_entry(&mut out, &name, &content)?;
                stats.entries += 1;
                stats.substituted += 1;
                continue;
            }
        }

        pass_through(&mut out, &name, &mut entry)?;
        stats.entries += 1;
    }

    drain_source(archive)?;
    finalize(out)?;
    debug!(entries = stats.entries, substituted = stats.substituted, "tar.gz rewrite complete");
    Ok(stats)
}

/// Append-after flow: every base entry passes through verbatim except the
/// known annexed paths, which are skipped and re-appended afterwards from
/// resolved store content, in enumeration order.
///
/// Yields the same entry set and per-entry bytes as the streaming flow; only
/// the entry order differs.
///
/// # Errors
///
/// As [`rewrite_streaming`]; additionally fails when an enumerated path does
/// not resolve, since the two annex-detection strategies disagreeing is a
/// defect rather than an expected state.
pub fn rewrite_appending<R: Read, W: Write>(
    source: R,
    target: W,
    resolver: &mut dyn AnnexResolver,
    annexed_paths: &[String],
    prefix: &str,
    commit: &CommitId,
) -> Result<RewriteStats> {
    let skip: HashSet<&str> = annexed_paths.iter().map(String::as_str).collect();

    let gzip = GzEncoder::new(target, Compression::default());
    let mut out = Builder::new(gzip);
    write_global_comment(&mut out, commit)?;

    let mut archive = Archive::new(source);
    let mut stats = RewriteStats::default();
    for entry in archive.entries().context("reading base archive")? {
        let mut entry = entry.context("reading base archive entry")?;
        if entry.header().entry_type() == EntryType::XGlobalHeader {
            continue;
        }
        let name = entry_name(&entry)?;
        let tracked = name.strip_prefix(prefix).unwrap_or(&name);
        if skip.contains(tracked) {
            continue;
        }
        pass_through(&mut out, &name, &mut entry)?;
        stats.entries += 1;
    }
    drain_source(archive)?;

    for path in annexed_paths {
        let content = resolver
            .resolve(path)
            .with_context(|| format!("resolving {path}"))?
            .with_context(|| {
                format!("path {path} was enumerated as annexed but did not resolve to content")
            })?;
        trace!(path = %path, key = %content.key, "appending store content");
        append_store_entry(&mut out, &format!("{prefix}{path}"), &content)?;
        stats.entries += 1;
        stats.substituted += 1;
    }

    finalize(out)?;
    debug!(entries = stats.entries, substituted = stats.substituted, "tar.gz rewrite complete");
    Ok(stats)
}

fn entry_name<R: Read>(entry: &Entry<'_, R>) -> Result<String> {
    let bytes = entry.path_bytes().into_owned();
    String::from_utf8(bytes).map_err(|err| {
        anyhow::anyhow!(
            "base archive entry name is not valid UTF-8: {:?}",
            String::from_utf8_lossy(err.as_bytes())
        )
    })
}

fn pass_through<R: Read, W: Write>(
    out: &mut Builder<W>,
    name: &str,
    entry: &mut Entry<'_, R>,
) -> Result<()> {
    let mut header = entry.header().clone();
    // The raw header already carries the full name unless the producer needed
    // a long-name extension; keeping it verbatim preserves details path-based
    // rewriting would normalize away (trailing slashes on directories).
    if header.path_bytes().as_ref() == name.as_bytes() {
        return out
            .append(&header, entry)
            .with_context(|| format!("writing entry {name}"));
    }
    if header.entry_type() == EntryType::Symlink {
        let link = entry
            .link_name()
            .with_context(|| format!("reading symlink target of {name}"))?
            .with_context(|| format!("symlink entry {name} has no target"))?
            .into_owned();
        out.append_link(&mut header, Path::new(name), &link)
            .with_context(|| format!("writing symlink entry {name}"))
    } else {
        out.append_data(&mut header, Path::new(name), entry)
            .with_context(|| format!("writing entry {name}"))
    }
}

fn append_store_entry<W: Write>(
    out: &mut Builder<W>,
    name: &str,
    content: &AnnexedContent,
) -> Result<()> {
    let file = File::open(&content.location)
        .with_context(|| format!("opening store content {}", content.location.display()))?;
    let mut header = Header::new_gnu();
    header.set_metadata(&content.metadata);
    // The per-entry handle is consumed by the copy and closed here, before
    // the next entry is processed.
    out.append_data(&mut header, Path::new(name), file)
        .with_context(|| format!("writing store content for {name}"))
}

/// One pax global extended-header record, keyed `comment`, carrying the
/// source commit id.
fn write_global_comment<W: Write>(out: &mut Builder<W>, commit: &CommitId) -> Result<()> {
    let record = pax_record("comment", commit.as_str());
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::XGlobalHeader);
    header
        .set_path("pax_global_header")
        .context("naming archive comment header")?;
    header.set_mode(0o666);
    header.set_size(record.len() as u64);
    header.set_mtime(0);
    header.set_cksum();
    out.append(&header, record.as_slice())
        .context("writing archive comment header")
}

/// Encode one pax record: `<len> <key>=<value>\n`, where `<len>` counts the
/// entire record including its own digits.
fn pax_record(key: &str, value: &str) -> Vec<u8> {
    let base = key.len() + value.len() + 3;
    let mut len = base;
    loop {
        let total = base + len.to_string().len();
        if total == len {
            break;
        }
        len = total;
    }
    format!("{len} {key}={value}\n").into_bytes()
}

fn drain_source<R: Read>(archive: Archive<R>) -> Result<()> {
    let mut source = archive.into_inner();
    io::copy(&mut source, &mut io::sink()).context("draining base archive trailer")?;
    Ok(())
}

fn finalize<W: Write>(out: Builder<GzEncoder<W>>) -> Result<()> {
    let gzip = out.into_inner().context("finalizing tar trailer")?;
    gzip.finish().context("finalizing gzip stream")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pax_records_count_their_own_length() {
        assert_eq!(pax_record("comment", "abc"), b"15 comment=abc\n".to_vec());
        // An 88-byte value lands the total right across the three-digit
        // boundary, where the length field grows itself.
        let long = "x".repeat(88);
        let record = pax_record("comment", &long);
        assert_eq!(record.len(), 101);
        assert!(record.starts_with(b"101 comment="));
    }

    #[test]
    fn global_comment_is_a_single_pax_record() -> Result<()> {
        let mut out = Builder::new(Vec::new());
        write_global_comment(&mut out, &CommitId::new("c1"))?;
        let bytes = out.into_inner()?;

        let mut archive = Archive::new(bytes.as_slice());
        let mut entries = archive.entries()?;
        let mut entry = entries.next().expect("one entry")?;
        assert_eq!(entry.header().entry_type(), EntryType::XGlobalHeader);
        let mut data = String::new();
        entry.read_to_string(&mut data)?;
        assert_eq!(data, "14 comment=c1\n");
        Ok(())
    }
}
