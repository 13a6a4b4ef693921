//! Downlevel hook for `logic` fields shipped to the browser.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranspileError {
    #[error("unterminated {what} starting at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },
}

/// Rewrites client-side logic into a dialect older browsers accept.
pub trait LogicTranspiler: Send + Sync {
    fn transpile(&self, source: &str) -> Result<String, TranspileError>;
}

/// Leaves the source untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl LogicTranspiler for Passthrough {
    fn transpile(&self, source: &str) -> Result<String, TranspileError> {
        Ok(source.to_string())
    }
}

/// Rewrites block-scoped `let`/`const` declarations to `var`. String
/// literals, template literals and comments are copied verbatim, as are
/// property accesses such as `obj.let`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarationDownlevel;

impl LogicTranspiler for DeclarationDownlevel {
    fn transpile(&self, source: &str) -> Result<String, TranspileError> {
        let bytes = source.as_bytes();
        let mut out = String::with_capacity(source.len());
        let mut i = 0;
        // Last significant (non-whitespace, non-comment) byte emitted.
        let mut last_significant: Option<u8> = None;

        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    let end = source[i..].find('\n').map_or(bytes.len(), |n| i + n);
                    out.push_str(&source[i..end]);
                    i = end;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    let end = source[i + 2..]
                        .find("*/")
                        .map(|n| i + 2 + n + 2)
                        .ok_or(TranspileError::Unterminated {
                            what: "block comment",
                            offset: i,
                        })?;
                    out.push_str(&source[i..end]);
                    i = end;
                }
                b'"' | b'\'' | b'`' => {
                    let end = skip_quoted(bytes, i)?;
                    out.push_str(&source[i..end]);
                    last_significant = Some(b);
                    i = end;
                }
                _ if is_ident_start(b) => {
                    let end = i + bytes[i..]
                        .iter()
                        .take_while(|c| is_ident_continue(**c))
                        .count();
                    let word = &source[i..end];
                    if (word == "let" || word == "const") && last_significant != Some(b'.') {
                        out.push_str("var");
                    } else {
                        out.push_str(word);
                    }
                    last_significant = Some(bytes[end - 1]);
                    i = end;
                }
                _ => {
                    // Copy the whole (possibly multi-byte) character.
                    let len = source[i..].chars().next().map_or(1, char::len_utf8);
                    out.push_str(&source[i..i + len]);
                    if !b.is_ascii_whitespace() {
                        last_significant = Some(b);
                    }
                    i += len;
                }
            }
        }
        Ok(out)
    }
}

/// End offset (exclusive) of the quoted literal opening at `start`.
fn skip_quoted(bytes: &[u8], start: usize) -> Result<usize, TranspileError> {
    let quote = bytes[start];
    let what = if quote == b'`' { "template literal" } else { "string literal" };
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => break,
            c if c == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(TranspileError::Unterminated { what, offset: start })
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}
