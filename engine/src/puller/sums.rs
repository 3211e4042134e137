//! Digest manifest parsing
//!
//! A digest manifest is the `sha256sum` output format: one
//! `<hex digest><whitespace><filename>` pair per line. Lines that are blank,
//! not UTF-8, not exactly two fields, or whose first field is not 64 hex
//! characters are skipped. A leading `*` on the filename (binary mode marker)
//! is ignored.

use pluck_sdk::{Digest, DIGEST_LEN};

/// Parse a single manifest line
pub fn parse_line(line: &str) -> Option<(Digest, &str)> {
    let mut fields = line.split_ascii_whitespace();
    let hex = fields.next()?;
    let file_name = fields.next()?;
    if fields.next().is_some() || hex.len() != 2 * DIGEST_LEN {
        return None;
    }
    let digest = Digest::from_hex(hex).ok()?;
    let file_name = file_name.strip_prefix('*').unwrap_or(file_name);
    Some((digest, file_name))
}

/// Digest listed for `file_name`; the first matching line wins
pub fn find_digest(manifest: &[u8], file_name: &str) -> Option<Digest> {
    manifest
        .split(|b| *b == b'\n')
        .filter_map(|line| std::str::from_utf8(line).ok())
        .filter_map(parse_line)
        .find(|(_, name)| *name == file_name)
        .map(|(digest, _)| digest)
}
