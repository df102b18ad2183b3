//! Redaction of personal data and secrets in log output.
//!
//! Every formatted log line passes through [`SanitizingMakeWriter`] before it
//! reaches the sink. What gets masked:
//! - medic email addresses and profile phone numbers
//! - `password=...`, `private_key=...` and similar assignments
//! - bare 32-byte hex strings (the shape of an account private key)
//! - PEM key blocks
//!
//! `0x`-prefixed hashes and addresses are left readable, since transaction
//! hashes and senders are what an operator needs when reconciling.
//!
//! Input longer than `HEALTHLEDGER_SANITIZE_MAX_BYTES` (default 16 KiB) is
//! clipped before scanning.

use std::borrow::Cow;
use std::io::Write;
use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use tracing_subscriber::fmt::MakeWriter;

const MAX_BYTES_ENV: &str = "HEALTHLEDGER_SANITIZE_MAX_BYTES";
const DEFAULT_MAX_BYTES: usize = 16 * 1024;
const CLIPPED: &str = " [TRUNCATED]";

/// Category of masked content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redaction {
    Email,
    Phone,
    Secret,
    Key,
    PemPrivate,
    PemPublic,
}

impl Redaction {
    fn label(self) -> &'static str {
        match self {
            Self::Email => "[REDACTED-EMAIL]",
            Self::Phone => "[REDACTED-PHONE]",
            Self::Secret => "[REDACTED-SECRET]",
            Self::Key => "[REDACTED-KEY]",
            Self::PemPrivate => "[REDACTED-PEM-PRIVATE-KEY]",
            Self::PemPublic => "[REDACTED-PEM-PUBLIC-KEY]",
        }
    }
}

struct Rule {
    kind: Redaction,
    regex: Regex,
}

/// Line-level rules, in application order.
const LINE_RULES: &[(Redaction, &str)] = &[
    (
        Redaction::Email,
        r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
    ),
    (
        Redaction::Phone,
        r"\+\d{1,3}[-\s]?\d{2,4}[-\s]?\d{3,4}[-\s]?\d{3,4}\b",
    ),
    // 555-0100, 02 555 0100
    (Redaction::Phone, r"\b(?:\d{2,3}[-\s])?\d{3}[-\s]\d{4}\b"),
    (
        Redaction::Secret,
        r#"(?i)\b(?:password|passwd|pwd|old_password|new_password|private[_-]?key|deployer[_-]?key|secret)\b\s*[:=]\s*"?[^\s",}]+"?"#,
    ),
    (Redaction::Key, r"\b[0-9a-fA-F]{64}\b"),
];

/// PEM blocks span lines; kept out of the set so the set stays small.
const BLOCK_RULES: &[(Redaction, &str)] = &[
    (
        Redaction::PemPrivate,
        r"(?s)-----BEGIN [A-Z0-9 ]{0,40}PRIVATE KEY-----.{0,8192}?-----END [A-Z0-9 ]{0,40}PRIVATE KEY-----",
    ),
    (
        Redaction::PemPublic,
        r"(?s)-----BEGIN [A-Z0-9 ]{0,40}PUBLIC KEY-----.{0,4096}?-----END [A-Z0-9 ]{0,40}PUBLIC KEY-----",
    ),
];

struct Redactor {
    any_line_rule: RegexSet,
    line_rules: Vec<Rule>,
    block_rules: Vec<Rule>,
}

fn compile(rules: &[(Redaction, &str)]) -> Vec<Rule> {
    rules
        .iter()
        .map(|(kind, pattern)| Rule {
            kind: *kind,
            regex: Regex::new(pattern).expect("Valid regex"),
        })
        .collect()
}

fn redactor() -> &'static Redactor {
    static REDACTOR: OnceLock<Redactor> = OnceLock::new();
    REDACTOR.get_or_init(|| Redactor {
        any_line_rule: RegexSet::new(LINE_RULES.iter().map(|(_, p)| *p)).expect("Valid regex set"),
        line_rules: compile(LINE_RULES),
        block_rules: compile(BLOCK_RULES),
    })
}

impl Redactor {
    fn has_block(text: &str) -> bool {
        text.contains("-----BEGIN ")
    }

    fn detects(&self, text: &str) -> bool {
        self.any_line_rule.is_match(text)
            || (Self::has_block(text) && self.block_rules.iter().any(|r| r.regex.is_match(text)))
    }

    fn redact<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let mut out = Cow::Borrowed(text);

        for idx in self.any_line_rule.matches(text).iter() {
            self.line_rules[idx].apply(&mut out);
        }

        if Self::has_block(&out) {
            for rule in &self.block_rules {
                rule.apply(&mut out);
            }
        }
        out
    }
}

impl Rule {
    fn apply(&self, text: &mut Cow<'_, str>) {
        let replaced = match self.regex.replace_all(&**text, self.kind.label()) {
            Cow::Owned(s) => Some(s),
            Cow::Borrowed(_) => None,
        };
        if let Some(s) = replaced {
            *text = Cow::Owned(s);
        }
    }
}

fn max_bytes() -> usize {
    std::env::var(MAX_BYTES_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_MAX_BYTES)
}

/// Longest prefix of at most `limit` bytes ending on a char boundary.
fn clip(input: &str, limit: usize) -> Option<&str> {
    if input.len() <= limit {
        return None;
    }
    let end = (0..=limit).rev().find(|&i| input.is_char_boundary(i)).unwrap_or(0);
    Some(&input[..end])
}

/// Mask personal data and secrets in `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_within(input, max_bytes())
}

fn sanitize_within(input: &str, limit: usize) -> String {
    match clip(input, limit) {
        None => redactor().redact(input).into_owned(),
        Some(prefix) => {
            let mut out = redactor().redact(prefix).into_owned();
            out.push_str(CLIPPED);
            out
        }
    }
}

/// Whether `input` holds anything [`sanitize`] would mask.
#[must_use]
pub fn contains_pii(input: &str) -> bool {
    let limit = max_bytes();
    redactor().detects(clip(input, limit).unwrap_or(input))
}

/// `MakeWriter` that redacts each formatted line before the inner sink.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter {
            inner: self.inner.make_writer(),
            pending: Vec::new(),
            limit: max_bytes(),
        }
    }
}

/// Buffers partial lines; whole lines are redacted and forwarded.
pub struct SanitizingWriter<W> {
    inner: W,
    pending: Vec<u8>,
    limit: usize,
}

impl<W: Write> SanitizingWriter<W> {
    fn emit(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        self.inner
            .write_all(sanitize_within(&text, self.limit).as_bytes())
    }

    fn drain_lines(&mut self) -> std::io::Result<()> {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Ok(());
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        for line in complete.split_inclusive(|&b| b == b'\n') {
            self.emit(line)?;
        }
        Ok(())
    }
}

impl<W: Write> Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain_lines()?;

        // A runaway line without a newline is cut rather than buffered forever.
        if self.pending.len() > self.limit.saturating_mul(2) {
            let runaway = std::mem::take(&mut self.pending);
            self.emit(&runaway)?;
            self.inner.write_all(b"\n")?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.drain_lines()?;
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest)?;
        }
        self.inner.flush()
    }
}
