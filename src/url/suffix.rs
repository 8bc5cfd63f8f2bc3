//! Compiled-in public-suffix seed table
//!
//! A minimal multi-label suffix list covering the ccTLD registries the
//! crawler is pointed at today. Single-label TLDs fall out of the default
//! rule (last label), so only multi-label suffixes need to be listed.

/// Multi-label public suffixes, lowercase and left-normalized.
pub(crate) const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "ac.uk", "gov.uk", "org.uk", "sch.uk", "com.au", "net.au", "org.au", "edu.au",
    "gov.au", "co.jp", "ne.jp", "or.jp", "ac.jp", "go.jp", "co.nz", "org.nz", "govt.nz", "ac.nz",
    "com.br", "net.br", "org.br", "gov.br", "com.cn", "net.cn", "org.cn", "gov.cn",
];

/// Length in labels of the public suffix of `host_lc` (already lowercased):
/// 2 for "co.uk", 1 for "com", 0 when the host has no label semantics.
///
/// A multi-label suffix only matches on a whole-label boundary: either the
/// host *is* the suffix, or the character immediately before it is a dot.
pub(crate) fn suffix_label_count(host_lc: &str) -> usize {
    if host_lc.is_empty() {
        return 0;
    }

    for suffix in MULTI_LABEL_SUFFIXES {
        if host_lc.len() >= suffix.len() && host_lc.ends_with(suffix) {
            let boundary = host_lc.len() - suffix.len();
            if boundary == 0 || host_lc.as_bytes()[boundary - 1] == b'.' {
                return suffix.matches('.').count() + 1;
            }
        }
    }

    // Fallback: the last label is the TLD.
    1
}
