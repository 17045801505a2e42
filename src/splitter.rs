//! Client-side statement splitting.
//!
//! This is a convenience split, not a validator: unterminated strings or
//! comments simply run to the end of the input and become part of the last
//! statement.

use std::ops::Range;

use crate::syntax::{step, ParseState, Step};

/// Byte ranges of every executable statement in `text`, in source order.
///
/// Ranges are trimmed of surrounding whitespace and never include the `;`
/// separator. Segments holding only whitespace or comments are dropped.
pub fn statement_spans(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut state = ParseState::Normal;
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    loop {
        let (next, what) = step(bytes, i, &mut state);
        match what {
            Step::Semi => {
                push_trimmed(text, start..next - 1, &mut spans);
                start = next;
            }
            Step::Advance => {}
            Step::Eof => {
                push_trimmed(text, start..text.len(), &mut spans);
                break;
            }
        }
        i = next;
    }
    spans
}

/// Split `text` into independently executable statements.
pub fn split_sql(text: &str) -> Vec<String> {
    statement_spans(text)
        .into_iter()
        .map(|r| text[r].to_owned())
        .collect()
}

/// Statement containing the cursor, for "run current statement".
///
/// `cursor` counts characters, not bytes. A cursor sitting directly after
/// the last character of a statement (on its `;`, or at end of input) still
/// selects it; a cursor on whitespace between statements selects nothing.
pub fn statement_at_position(text: &str, cursor: usize) -> Option<String> {
    let offset = char_to_byte(text, cursor)?;
    statement_spans(text)
        .into_iter()
        .find(|r| r.start <= offset && offset <= r.end)
        .map(|r| text[r].to_owned())
}

fn char_to_byte(text: &str, cursor: usize) -> Option<usize> {
    text.char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .nth(cursor)
}

fn push_trimmed(text: &str, raw: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let seg = &text[raw.clone()];
    let lead = seg.len() - seg.trim_start().len();
    let trail = seg.len() - seg.trim_end().len();
    if lead == seg.len() {
        return;
    }
    let span = raw.start + lead..raw.end - trail;
    if has_code(&text[span.clone()]) {
        spans.push(span);
    }
}

/// True when the segment holds anything besides whitespace and comments.
fn has_code(seg: &str) -> bool {
    let bytes = seg.as_bytes();
    let mut state = ParseState::Normal;
    let mut i = 0usize;
    loop {
        if state == ParseState::Normal && i < bytes.len() {
            let b = bytes[i];
            let comment = matches!(
                (b, bytes.get(i + 1)),
                (b'-', Some(b'-')) | (b'/', Some(b'*'))
            );
            if !b.is_ascii_whitespace() && !comment {
                return true;
            }
        }
        let (next, what) = step(bytes, i, &mut state);
        if what == Step::Eof {
            return false;
        }
        i = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_inside_string_is_not_a_boundary() {
        assert_eq!(split_sql("SELECT ';' ; SELECT 1"), vec!["SELECT ';'", "SELECT 1"]);
    }

    #[test]
    fn identifiers_and_comments_are_respected() {
        let sql = "SELECT `a;b` FROM t -- trailing; note\n; /* x; y */ SELECT \"c;\"";
        assert_eq!(
            split_sql(sql),
            vec![
                "SELECT `a;b` FROM t -- trailing; note",
                "/* x; y */ SELECT \"c;\"",
            ]
        );
    }

    #[test]
    fn empty_and_trailing_separators_produce_nothing() {
        assert!(split_sql("").is_empty());
        assert!(split_sql("   \n\t").is_empty());
        assert!(split_sql(";;  ;").is_empty());
        assert_eq!(split_sql("SELECT 1;\n"), vec!["SELECT 1"]);
        assert_eq!(split_sql("  SELECT 1 ;; SELECT 2;  "), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn comment_only_segments_are_dropped() {
        assert_eq!(split_sql("SELECT 1; -- done"), vec!["SELECT 1"]);
        assert_eq!(split_sql("/* header */;SELECT 2"), vec!["SELECT 2"]);
    }

    #[test]
    fn unterminated_literal_swallows_the_rest() {
        assert_eq!(split_sql("SELECT 1; SELECT 'oops; SELECT 2"), vec!["SELECT 1", "SELECT 'oops; SELECT 2"]);
        assert_eq!(split_sql("SELECT /* open; SELECT 2"), vec!["SELECT /* open; SELECT 2"]);
    }

    #[test]
    fn statement_at_cursor() {
        let sql = "SELECT 1;   SELECT 2;";
        assert_eq!(statement_at_position(sql, 0).as_deref(), Some("SELECT 1"));
        assert_eq!(statement_at_position(sql, 8).as_deref(), Some("SELECT 1"));
        assert_eq!(statement_at_position(sql, 10), None);
        assert_eq!(statement_at_position(sql, 15).as_deref(), Some("SELECT 2"));
        assert_eq!(statement_at_position(sql, 21).as_deref(), None);
        assert_eq!(statement_at_position(sql, 99), None);
    }

    #[test]
    fn cursor_counts_characters() {
        let sql = "SELECT 'é'; SELECT 2";
        // 'é' is two bytes; char offset 12 is the 'S' of the second statement
        assert_eq!(statement_at_position(sql, 12).as_deref(), Some("SELECT 2"));
        assert_eq!(statement_at_position(sql, 20).as_deref(), Some("SELECT 2"));
    }
}
