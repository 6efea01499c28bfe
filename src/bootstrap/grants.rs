//! Neutralizes role grants that the target database cannot satisfy.
//!
//! The schema file ends with three schema-wide grants to a fixed role. Managed
//! databases usually have no such role, and one failing statement aborts the
//! whole batch, so each grant is replaced by a SQL comment before execution:
//!
//! ```text
//! GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA public TO raymond_admin;
//!   -> -- Skipped: GRANT for raymond_admin
//! ```
//!
//! Matching works on tokens, not exact text: keywords and the role compare
//! case-insensitively, any run of whitespace (newlines included) separates
//! tokens, and whitespace may precede the `;`. Text following a statement on
//! the same line moves to the next line so the comment cannot swallow it.
//! Everything else in the script is left byte-for-byte unchanged.

use super::BootstrapError;

/// Role targeted when none is configured.
pub const DEFAULT_GRANT_ROLE: &str = "raymond_admin";

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Token sequences of the rewritten grants, up to and including `TO`.
const GRANT_STATEMENTS: [&[&str]; 3] = [
    &[
        "GRANT",
        "ALL",
        "PRIVILEGES",
        "ON",
        "ALL",
        "TABLES",
        "IN",
        "SCHEMA",
        "public",
        "TO",
    ],
    &[
        "GRANT",
        "ALL",
        "PRIVILEGES",
        "ON",
        "ALL",
        "SEQUENCES",
        "IN",
        "SCHEMA",
        "public",
        "TO",
    ],
    &[
        "GRANT",
        "EXECUTE",
        "ON",
        "ALL",
        "FUNCTIONS",
        "IN",
        "SCHEMA",
        "public",
        "TO",
    ],
];

/// Result of rewriting a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub sql: String,
    /// Number of grant statements replaced.
    pub skipped: usize,
}

/// Replaces the schema-wide grants to one role with comments.
#[derive(Debug, Clone)]
pub struct GrantRewriter {
    role: String,
    replacement: String,
}

impl GrantRewriter {
    /// # Errors
    ///
    /// Returns [`BootstrapError::InvalidRole`] unless `role` is a plain SQL
    /// identifier (letter or `_`, then letters, digits, `_` or `$`).
    pub fn new(role: impl Into<String>) -> Result<Self, BootstrapError> {
        let role = role.into();
        if !is_plain_identifier(&role) {
            return Err(BootstrapError::InvalidRole(role));
        }

        let replacement = format!("-- Skipped: GRANT for {role}");
        Ok(Self { role, replacement })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn rewrite(&self, sql: &str) -> Rewrite {
        let bytes = sql.as_bytes();
        let mut out = String::with_capacity(sql.len());
        let mut skipped = 0;
        let mut copied_to = 0;
        let mut pos = 0;

        while pos < bytes.len() {
            let end = if starts_word(bytes, pos) {
                self.match_grant(bytes, pos)
            } else {
                None
            };

            let Some(end) = end else {
                pos += 1;
                continue;
            };

            // Both offsets sit on ASCII bytes, so they are char boundaries
            out.push_str(sql.get(copied_to..pos).unwrap_or_default());
            out.push_str(&self.replacement);
            if has_trailing_text(sql.get(end..).unwrap_or_default()) {
                out.push('\n');
            }

            skipped += 1;
            pos = end;
            copied_to = end;
        }

        out.push_str(sql.get(copied_to..).unwrap_or_default());
        Rewrite { sql: out, skipped }
    }

    /// End offset (just past the `;`) of a grant starting at `start`.
    fn match_grant(&self, bytes: &[u8], start: usize) -> Option<usize> {
        GRANT_STATEMENTS.iter().find_map(|tokens| {
            let pos = match_tokens(bytes, start, tokens.iter().copied())?;
            let pos = skip_whitespace(bytes, pos, 1)?;
            let pos = match_tokens(bytes, pos, [self.role.as_str()])?;
            let pos = skip_whitespace(bytes, pos, 0)?;
            (bytes.get(pos) == Some(&b';')).then_some(pos + 1)
        })
    }
}

impl Default for GrantRewriter {
    fn default() -> Self {
        Self {
            role: DEFAULT_GRANT_ROLE.to_string(),
            replacement: format!("-- Skipped: GRANT for {DEFAULT_GRANT_ROLE}"),
        }
    }
}

/// Match whitespace-separated `tokens` case-insensitively from `start`.
fn match_tokens<'a>(
    bytes: &[u8],
    start: usize,
    tokens: impl IntoIterator<Item = &'a str>,
) -> Option<usize> {
    let mut pos = start;
    for (i, token) in tokens.into_iter().enumerate() {
        if i > 0 {
            pos = skip_whitespace(bytes, pos, 1)?;
        }
        let end = pos + token.len();
        let candidate = bytes.get(pos..end)?;
        if !candidate.eq_ignore_ascii_case(token.as_bytes()) {
            return None;
        }
        pos = end;
    }
    Some(pos)
}

/// Skip ASCII whitespace, requiring at least `min` bytes of it.
fn skip_whitespace(bytes: &[u8], start: usize, min: usize) -> Option<usize> {
    let count = bytes
        .get(start..)
        .unwrap_or_default()
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    (count >= min).then_some(start + count)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn starts_word(bytes: &[u8], pos: usize) -> bool {
    let boundary = pos == 0 || bytes.get(pos - 1).is_none_or(|&b| !is_word_byte(b));
    boundary && bytes.get(pos).is_some_and(|b| b.eq_ignore_ascii_case(&b'G'))
}

/// Whether anything but whitespace follows on the current line.
fn has_trailing_text(rest: &str) -> bool {
    rest.lines().next().is_some_and(|line| !line.trim().is_empty())
}

fn is_plain_identifier(role: &str) -> bool {
    let mut chars = role.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    role.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
