use std::{
    fs::File,
    io::{self, Cursor, Write},
};

use anyhow::{ensure, Context, Result};
use time::OffsetDateTime;
use tracing::{debug, trace};
use zip::{read::ZipArchive, write::FileOptions, CompressionMethod, ZipWriter};

use annexport_domain::CommitId;

use crate::core::annex::{AnnexResolver, AnnexedContent};
use crate::core::rewrite::RewriteStats;

/// Rewrite a fully materialized base zip archive.
///
/// Central-directory entries are visited in order. Annexed entries are
/// rebuilt from the real file's stat and recompressed with deflate;
/// everything else is raw-copied, keeping whatever compression method the
/// base archive used. The base archive's end-of-central-directory comment
/// must carry the commit id and is copied verbatim to the output.
///
/// Zip writing needs random access for the trailing central directory, so the
/// output is assembled in memory and copied to the target at the end.
///
/// # Errors
///
/// Returns an error when the base archive is malformed, its comment does not
/// match the commit, a resolved content path cannot be opened, or writing the
/// output fails.
pub fn rewrite_materialized(
    base: Vec<u8>,
    target: &mut dyn Write,
    resolver: &mut dyn AnnexResolver,
    prefix: &str,
    commit: &CommitId,
) -> Result<RewriteStats> {
    let mut archive =
        ZipArchive::new(Cursor::new(base)).context("parsing base zip archive")?;
    let comment = archive.comment().to_vec();
    ensure!(
        comment == commit.as_str().as_bytes(),
        "base zip archive comment {:?} does not record commit {commit}",
        String::from_utf8_lossy(&comment)
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.set_raw_comment(comment);

    let mut stats = RewriteStats::default();
    for index in 0..archive.len() {
        let name = {
            let entry = archive
                .by_index_raw(index)
                .with_context(|| format!("reading base archive entry {index}"))?;
            entry.name().to_string()
        };
        let tracked = name.strip_prefix(prefix).unwrap_or(&name);

        let resolved = if name.ends_with('/') {
            None
        } else {
            resolver
                .resolve(tracked)
                .with_context(|| format!("resolving {tracked}"))?
        };

        match resolved {
            Some(content) => {
                trace!(path = %tracked, key = %content.key, "substituting store content");
                substitute(&mut writer, &name, &content)?;
                stats.substituted += 1;
            }
            None => {
                let entry = archive
                    .by_index_raw(index)
                    .with_context(|| format!("reading base archive entry {index}"))?;
                writer
                    .raw_copy_file(entry)
                    .with_context(|| format!("copying entry {name}"))?;
            }
        }
        stats.entries += 1;
    }

    let cursor = writer.finish().context("finalizing zip central directory")?;
    target
        .write_all(cursor.get_ref())
        .context("writing zip archive to target")?;
    debug!(entries = stats.entries, substituted = stats.substituted, "zip rewrite complete");
    Ok(stats)
}

fn substitute(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    content: &AnnexedContent,
) -> Result<()> {
    let mut options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(content.metadata.len() >= u64::from(u32::MAX));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(content.metadata.permissions().mode() & 0o777);
    }
    if let Ok(modified) = content.metadata.modified() {
        if let Ok(stamp) = zip::DateTime::try_from(OffsetDateTime::from(modified)) {
            options = options.last_modified_time(stamp);
        }
    }

    writer
        .start_file(name, options)
        .with_context(|| format!("writing header for {name}"))?;
    let mut file = File::open(&content.location)
        .with_context(|| format!("opening store content {}", content.location.display()))?;
    // The per-entry handle is consumed by the copy and closed here, before
    // the next entry is processed.
    io::copy(&mut file, writer).with_context(|| format!("writing store content for {name}"))?;
    Ok(())
}
