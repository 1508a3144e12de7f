//! Line-based truncation of command output.
//!
//! Output handed back to an agent must stay small enough for its context
//! window. Long output keeps its head and tail with one marker line between.

/// Output longer than this many lines is truncated.
pub const MAX_OUTPUT_LINES: usize = 500;
/// Lines kept from the start of truncated output.
pub const HEAD_LINES: usize = 200;
/// Lines kept from the end of truncated output.
pub const TAIL_LINES: usize = 300;

/// Lines after truncation: `(kept lines, dropped count)`.
pub fn truncate_lines(lines: Vec<String>) -> (Vec<String>, usize) {
    if lines.len() <= MAX_OUTPUT_LINES {
        return (lines, 0);
    }
    let dropped = lines.len() - HEAD_LINES - TAIL_LINES;
    let mut kept = Vec::with_capacity(HEAD_LINES + TAIL_LINES + 1);
    kept.extend_from_slice(&lines[..HEAD_LINES]);
    kept.push(truncation_marker(dropped));
    kept.extend_from_slice(&lines[lines.len() - TAIL_LINES..]);
    (kept, dropped)
}

/// Marker line inserted in place of the dropped middle section.
pub fn truncation_marker(dropped: usize) -> String {
    format!("... [TRUNCATED {dropped} LINES - OUTPUT TOO LARGE] ...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn short_output_is_untouched() {
        let (kept, dropped) = truncate_lines(numbered(500));
        assert_eq!(kept.len(), 500);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let (kept, dropped) = truncate_lines(numbered(600));
        assert_eq!(kept.len(), 501);
        assert_eq!(dropped, 100);
        assert_eq!(kept[0], "line 1");
        assert_eq!(kept[199], "line 200");
        assert!(kept[200].contains("TRUNCATED 100 LINES"));
        assert_eq!(kept[201], "line 301");
        assert_eq!(kept[500], "line 600");
    }
}
