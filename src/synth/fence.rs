//! Removal of Markdown code fences around generated source.
//!
//! Only exact markers at the exact start or end of the text are recognised;
//! fences in the middle of the text are left alone.

const LEADING: &[&str] = &["```python", "```py", "```"];
const TRAILING: &[&str] = &["```\n", "```"];

/// Strip leading/trailing fence markers until none match.
pub fn strip_fences(text: &str) -> &str {
    let mut s = text;
    loop {
        let before = s.len();
        if let Some(marker) = LEADING.iter().find(|m| s.starts_with(*m)) {
            s = &s[marker.len()..];
            s = s.strip_prefix('\n').unwrap_or(s);
        }
        if let Some(marker) = TRAILING.iter().find(|m| s.ends_with(*m)) {
            s = &s[..s.len() - marker.len()];
        }
        if s.len() == before {
            return s;
        }
    }
}
