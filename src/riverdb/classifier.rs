/// Routing classification for a query: Read goes to the replica pool,
/// Write and Unknown stay on the master (safer default when we can't tell).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Classification {
    Read,
    Write,
    Unknown,
}

const MIN_VERB_LEN: usize = 6;
const READ_VERBS: &[&[u8]] = &[b"SELECT"];
const WRITE_VERBS: &[&[u8]] = &[b"INSERT", b"UPDATE", b"DELETE"];

/// Classifies a raw query buffer by its leading keyword, without allocating
/// or mutating the buffer's read position. Skips leading ASCII whitespace;
/// a remaining length under MIN_VERB_LEN classifies Unknown before any
/// keyword match is attempted. Otherwise does a case-insensitive match
/// against the known verb tables, requiring whitespace or end-of-input
/// immediately after the verb so "SELECTOR" doesn't match "SELECT".
pub fn classify(query: &[u8]) -> Classification {
    let body = skip_leading_whitespace(query);
    if body.len() < MIN_VERB_LEN {
        return Classification::Unknown;
    }
    if matches_any_verb(body, READ_VERBS) {
        return Classification::Read;
    }
    if matches_any_verb(body, WRITE_VERBS) {
        return Classification::Write;
    }
    Classification::Unknown
}

fn skip_leading_whitespace(buf: &[u8]) -> &[u8] {
    let start = buf.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(buf.len());
    &buf[start..]
}

fn matches_any_verb(body: &[u8], verbs: &[&[u8]]) -> bool {
    verbs.iter().any(|verb| starts_with_verb(body, verb))
}

/// True if `body` begins with `verb` (case-insensitive) followed by either
/// end-of-input or whitespace — so "SELECTOR" doesn't match "SELECT".
fn starts_with_verb(body: &[u8], verb: &[u8]) -> bool {
    if body.len() < verb.len() {
        return false;
    }
    if !body[..verb.len()].eq_ignore_ascii_case(verb) {
        return false;
    }
    match body.get(verb.len()) {
        None => true,
        Some(b) => b.is_ascii_whitespace(),
    }
}
