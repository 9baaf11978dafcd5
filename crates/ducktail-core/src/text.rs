//! Text position utilities: byte offsets, line:column pairs and line bounds.
//!
//! ## Coordinate Conventions
//!
//! - Lines and columns are **1-indexed** (matching editor conventions)
//! - Byte offsets are **0-indexed**
//! - Columns count bytes; module text is overwhelmingly ASCII
//! - Line/column values of 0 are treated as 1

use crate::patch::Span;

/// Convert a byte offset to 1-indexed line and column.
///
/// If `offset` exceeds the content length, returns the position at the end.
pub fn byte_offset_to_position(content: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(content.len());
    let mut line = 1u32;
    let mut col = 1u32;

    for &byte in &content.as_bytes()[..offset] {
        if byte == b'\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Convert 1-indexed line and column to a byte offset.
///
/// Positions past the end of a line clamp to the line's newline; positions
/// past the end of the content clamp to the content length.
pub fn position_to_byte_offset(content: &str, line: u32, col: u32) -> usize {
    let line = line.max(1);
    let col = col.max(1);
    let bytes = content.as_bytes();

    let mut current_line = 1u32;
    let mut line_start = 0usize;
    if line > 1 {
        let mut found = false;
        for (i, &byte) in bytes.iter().enumerate() {
            if byte == b'\n' {
                current_line += 1;
                if current_line == line {
                    line_start = i + 1;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return content.len();
        }
    }

    let line_end = bytes[line_start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| line_start + p)
        .unwrap_or(content.len());
    (line_start + (col as usize - 1)).min(line_end)
}

/// The full line containing `offset`, including its trailing newline.
pub fn line_bounds(content: &str, offset: usize) -> Span {
    let bytes = content.as_bytes();
    let offset = offset.min(bytes.len());
    let start = bytes[..offset]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    let end = bytes[offset..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| offset + p + 1)
        .unwrap_or(bytes.len());
    Span::new(start as u64, end as u64)
}

/// Leading spaces and tabs of the line containing `offset`.
pub fn line_indent(content: &str, offset: usize) -> &str {
    let line = line_bounds(content, offset);
    let text = &content[line.start as usize..line.end as usize];
    let width = text
        .bytes()
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count();
    &text[..width]
}

/// Extract the text covered by a span, if it is in bounds.
pub fn extract_span<'a>(content: &'a str, span: &Span) -> Option<&'a str> {
    content.get(span.start as usize..span.end as usize)
}

/// Preferred newline sequence of the content (CRLF when any line uses it).
pub fn newline_of(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}
