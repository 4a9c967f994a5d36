//! Tool output truncation, keeping the tail.
//!
//! Command output is most useful at the end (errors, summaries), so the
//! start is dropped first: by whole lines, then by characters when the
//! remaining lines are still too long.

/// A newline within this many characters of the cut point moves the cut
/// forward to the line start.
const SNAP_WINDOW_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedOutput {
    pub output: String,
    pub was_truncated: bool,
}

/// Keep at most `max_lines` lines and `max_chars` characters from the end
/// of `text`, prefixing a single notice describing what was dropped.
pub fn truncate_output_from_start(text: &str, max_lines: usize, max_chars: usize) -> TruncatedOutput {
    let mut kept = text;

    let lines_dropped = {
        let total = kept.split('\n').count();
        if total > max_lines {
            let drop = total - max_lines;
            let start = nth_line_start(kept, drop);
            kept = &kept[start..];
            drop
        } else {
            0
        }
    };

    let mut chars_dropped = 0;
    let char_count = kept.chars().count();
    if char_count > max_chars {
        let skip = char_count - max_chars;
        let mut cut = byte_offset_of_char(kept, skip);
        let at_line_start = kept[..cut].ends_with('\n');
        if let Some(nl) = kept[cut..].find('\n').filter(|_| !at_line_start) {
            let snapped = cut + nl + 1;
            if kept[cut..snapped].chars().count() <= SNAP_WINDOW_CHARS && snapped < kept.len() {
                cut = snapped;
            }
        }
        chars_dropped = kept[..cut].chars().count();
        kept = &kept[cut..];
    }

    let notice = match (lines_dropped, chars_dropped) {
        (0, 0) => {
            return TruncatedOutput {
                output: text.to_owned(),
                was_truncated: false,
            }
        }
        (l, 0) => format!("(previous {l} lines truncated)"),
        (0, c) => format!("(previous {c} characters truncated)"),
        (l, c) => format!("(previous output truncated: {l} lines and {c} characters removed)"),
    };

    TruncatedOutput {
        output: format!("{notice}\n\n{kept}"),
        was_truncated: true,
    }
}

/// Keep at most `max_chars` characters from the start of `text`, appending
/// a notice when something was cut.
pub fn truncate_tail_notice(text: &str, max_chars: usize, what: &str) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_owned();
    }
    let cut = byte_offset_of_char(text, max_chars);
    format!(
        "{}\n\n[{what} truncated: showing {max_chars} of {count} characters]",
        &text[..cut]
    )
}

fn nth_line_start(text: &str, n: usize) -> usize {
    text.match_indices('\n')
        .nth(n.saturating_sub(1))
        .map(|(i, _)| i + 1)
        .unwrap_or(text.len())
}

fn byte_offset_of_char(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINES: usize = 100;
    const CHARS: usize = 5000;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn short_output_is_unchanged() {
        let r = truncate_output_from_start("hello\nworld", LINES, CHARS);
        assert_eq!(r.output, "hello\nworld");
        assert!(!r.was_truncated);
        assert!(!truncate_output_from_start("", LINES, CHARS).was_truncated);
    }

    #[test]
    fn exactly_at_limits_is_unchanged() {
        assert!(!truncate_output_from_start(&numbered(LINES), LINES, CHARS).was_truncated);
        assert!(!truncate_output_from_start(&"a".repeat(CHARS), LINES, CHARS).was_truncated);
    }

    #[test]
    fn keeps_last_lines() {
        let r = truncate_output_from_start(&numbered(LINES + 30), LINES, CHARS);
        assert!(r.was_truncated);
        assert!(r.output.starts_with("(previous 30 lines truncated)\n\nline 31\n"));
        assert!(r.output.ends_with(&format!("line {}", LINES + 30)));
    }

    #[test]
    fn one_line_over() {
        let r = truncate_output_from_start(&numbered(LINES + 1), LINES, CHARS);
        assert!(r.output.contains("(previous 1 lines truncated)"));
        assert!(!r.output.contains("\nline 1\n"));
    }

    #[test]
    fn truncates_characters_at_line_boundary() {
        let input = format!("{}\n", "x".repeat(99)).repeat(60);
        let r = truncate_output_from_start(&input, LINES, CHARS);
        assert!(r.output.contains("characters truncated"));
        let content = &r.output[r.output.find("\n\n").unwrap() + 2..];
        assert!(content.starts_with('x'));
        assert!(content.len() <= CHARS);
    }

    #[test]
    fn single_long_line_is_cut_mid_line() {
        let input = format!("{}\n{}", "a".repeat(CHARS + 5000), "b".repeat(10));
        let r = truncate_output_from_start(&input, LINES, CHARS);
        let content = &r.output[r.output.find("\n\n").unwrap() + 2..];
        assert!(content.starts_with('a'));
        assert_eq!(content.chars().count(), CHARS);
    }

    #[test]
    fn combined_truncation_has_one_notice() {
        let line = "y".repeat(100);
        let input = vec![line; LINES * 2].join("\n");
        let r = truncate_output_from_start(&input, LINES, CHARS);
        assert!(r.output.starts_with(&format!(
            "(previous output truncated: {LINES} lines and"
        )));
        assert!(r.output.contains("characters removed"));
        assert_eq!(r.output.matches("(previous").count(), 1);
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let input = "é".repeat(CHARS + 10);
        let r = truncate_output_from_start(&input, LINES, CHARS);
        assert!(r.output.contains("(previous 10 characters truncated)"));
    }

    #[test]
    fn tail_notice_cuts_the_end() {
        assert_eq!(truncate_tail_notice("abc", 5, "diff"), "abc");
        let cut = truncate_tail_notice("abcdefgh", 3, "diff");
        assert!(cut.starts_with("abc\n\n[diff truncated: showing 3 of 8 characters]"));
    }
}
