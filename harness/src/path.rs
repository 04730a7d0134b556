// path.rs — Canonical report paths
//
// Maps a matched benchmark configuration to a deterministic, reproducible
// slash-separated directory string:
//
//   <workload_name>_<workload_enum>/wp_<p0>_<p1>_…/<category>/<dtype>/
//   <cat_params_digest_or_"default">/<cipher_mask>/<scheme>/<security>/<other>
//
// Every segment is sanitized to the alphabet [A-Za-z0-9._].

use sha2::{Digest, Sha256};

use crate::workload::{BenchmarkDescriptor, Workload, WorkloadParam, CAT_PARAMS_BYTES};

/// Hex characters kept from the category-parameter digest.
const DIGEST_CHARS: usize = 16;

/// Replace every run of characters outside `[A-Za-z0-9.]` with a single
/// underscore and strip leading/trailing underscores. Idempotent.
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '.' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Render the cipher-parameter mask segment: `all_plain` for 0,
/// `all_cipher` for a fully-set mask, otherwise a `c`/`p` string covering
/// bit 0 up to the highest set bit.
pub fn cipher_mask_text(mask: u32) -> String {
    if mask == 0 {
        return "all_plain".into();
    }
    if mask == u32::MAX {
        return "all_cipher".into();
    }
    let top = 31 - mask.leading_zeros();
    (0..=top)
        .map(|bit| if mask & (1 << bit) != 0 { 'c' } else { 'p' })
        .collect()
}

/// Digest segment for the raw category-parameter block: the literal
/// `default` for an all-zero block, otherwise a truncated SHA-256 hex of
/// the block verbatim (reserved bytes included).
pub fn cat_params_digest(raw: &[u8; CAT_PARAMS_BYTES]) -> String {
    if raw.iter().all(|&b| b == 0) {
        return "default".into();
    }
    let digest = Sha256::digest(raw);
    let mut hex = String::with_capacity(DIGEST_CHARS);
    for b in digest.iter().take(DIGEST_CHARS / 2) {
        use std::fmt::Write;
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

/// The `wp_<p0>_<p1>_…` segment.
fn workload_params_segment(w_params: &[WorkloadParam]) -> String {
    let mut seg = String::from("wp");
    for p in w_params {
        seg.push('_');
        seg.push_str(&p.to_string());
    }
    seg
}

/// Assemble the canonical path for a matched benchmark.
pub fn canonical_path(
    workload: Workload,
    descriptor: &BenchmarkDescriptor,
    w_params: &[WorkloadParam],
    scheme_name: &str,
    security_name: &str,
) -> String {
    let segments = [
        format!("{}_{}", workload.name(), descriptor.workload),
        workload_params_segment(w_params),
        descriptor.category.name().to_string(),
        descriptor.data_type.name().to_string(),
        cat_params_digest(&descriptor.cat_params_raw),
        cipher_mask_text(descriptor.cipher_param_mask),
        scheme_name.to_string(),
        security_name.to_string(),
        descriptor.other.to_string(),
    ];
    segments
        .iter()
        .map(|s| {
            let seg = sanitize(s);
            // A backend may answer an empty scheme/security name; keep the
            // path well-formed anyway.
            if seg.is_empty() {
                "unnamed".into()
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Tests ──────────────────────────────────────────────────────────────────
