pub mod targz;
pub mod zip;

/// Counters reported by a rewrite pass, folded into the export summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Entries written to the output archive, directories included.
    pub entries: usize,
    /// Entries whose placeholder bytes were replaced with store content.
    pub substituted: usize,
}
