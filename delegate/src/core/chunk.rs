//! Line-range reads and edits over in-memory file contents.
//!
//! Line numbers are 1-indexed and ranges are inclusive. Edits keep every byte
//! outside the replaced range untouched, including `\r\n` endings.

use crate::error::FsError;

/// Render lines `start..=end` of `contents`, each prefixed with its line number.
///
/// `end` past the end of the file is clamped.
pub fn number_lines(contents: &str, start: usize, end: usize) -> Result<String, FsError> {
    let lines: Vec<&str> = contents.lines().collect();
    if start < 1 || start > end {
        return Err(FsError::InvalidRange {
            start,
            end,
            len: lines.len(),
        });
    }
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate().skip(start - 1).take(end - start + 1) {
        out.push_str(&format!("{}: {line}\n", idx + 1));
    }
    Ok(out)
}

/// Replace lines `start..=end` of `contents` with `new_content`.
///
/// `end` may be `len + 1` to append after the last line. An empty
/// `new_content` deletes the range.
pub fn replace_lines(
    contents: &str,
    start: usize,
    end: usize,
    new_content: &str,
) -> Result<String, FsError> {
    let lines: Vec<&str> = contents.split_inclusive('\n').collect();
    let len = lines.len();
    if start < 1 || end > len + 1 || start > end {
        return Err(FsError::InvalidRange { start, end, len });
    }

    let cut = end.min(len);
    let prefix = &lines[..start - 1];
    let replaced = &lines[start - 1..cut];
    let suffix = &lines[cut..];

    let block = render_block(new_content, replaced, !suffix.is_empty());

    let mut out = String::with_capacity(contents.len() + block.len());
    for line in prefix {
        out.push_str(line);
    }
    // Appending after an unterminated last line must not glue onto it.
    if !block.is_empty() && !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&block);
    for line in suffix {
        out.push_str(line);
    }
    Ok(out)
}

/// Group blank-line separated paragraphs into chunks of about `max_chars`.
///
/// A single paragraph longer than `max_chars` becomes a chunk of its own.
pub fn paragraph_chunks(content: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    for paragraph in content.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let chars = paragraph.chars().count();
        if !current.is_empty() && current_chars + 2 + chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
            current_chars += 2;
        }
        current.push_str(paragraph);
        current_chars += chars;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn render_block(new_content: &str, replaced: &[&str], followed_by_lines: bool) -> String {
    if new_content.is_empty() {
        return String::new();
    }
    if new_content.ends_with('\n') {
        return new_content.to_string();
    }
    let needs_newline = followed_by_lines
        || replaced
            .last()
            .is_some_and(|last| last.ends_with('\n'));
    if needs_newline {
        format!("{new_content}\n")
    } else {
        new_content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "one\ntwo\nthree\nfour\n";

    #[test]
    fn number_lines_prefixes_original_numbers() {
        let out = number_lines(FILE, 2, 3).expect("chunk");
        assert_eq!(out, "2: two\n3: three\n");
    }

    #[test]
    fn number_lines_clamps_end() {
        let out = number_lines(FILE, 4, 99).expect("chunk");
        assert_eq!(out, "4: four\n");
    }

    #[test]
    fn number_lines_rejects_inverted_range() {
        let err = number_lines(FILE, 3, 2).unwrap_err();
        assert!(matches!(err, FsError::InvalidRange { start: 3, end: 2, .. }));
    }

    #[test]
    fn replacing_single_line_keeps_neighbours() {
        let lines: Vec<&str> = FILE.lines().collect();
        for k in 1..=lines.len() {
            let out = replace_lines(FILE, k, k, "X").expect("edit");
            let got: Vec<&str> = out.lines().collect();
            assert_eq!(got.len(), lines.len(), "k={k}");
            for (i, line) in got.iter().enumerate() {
                if i + 1 == k {
                    assert_eq!(*line, "X");
                } else {
                    assert_eq!(*line, lines[i]);
                }
            }
            assert!(out.ends_with('\n'), "k={k}");
        }
    }

    #[test]
    fn replacing_range_with_multiple_lines() {
        let out = replace_lines(FILE, 2, 3, "a\nb\nc").expect("edit");
        assert_eq!(out, "one\na\nb\nc\nfour\n");
    }

    #[test]
    fn last_line_without_newline_stays_unterminated() {
        let out = replace_lines("a\nb", 2, 2, "B").expect("edit");
        assert_eq!(out, "a\nB");
    }

    #[test]
    fn explicit_trailing_newline_wins() {
        let out = replace_lines("a\nb", 2, 2, "B\n").expect("edit");
        assert_eq!(out, "a\nB\n");
    }

    #[test]
    fn append_after_last_line() {
        let out = replace_lines("a\nb\n", 3, 3, "c").expect("edit");
        assert_eq!(out, "a\nb\nc");
        let out = replace_lines("a\nb", 3, 3, "c\n").expect("edit");
        assert_eq!(out, "a\nb\nc\n");
    }

    #[test]
    fn empty_content_deletes_range() {
        let out = replace_lines(FILE, 2, 3, "").expect("edit");
        assert_eq!(out, "one\nfour\n");
    }

    #[test]
    fn crlf_outside_range_is_preserved() {
        let out = replace_lines("a\r\nb\r\nc\r\n", 2, 2, "B").expect("edit");
        assert_eq!(out, "a\r\nB\nc\r\n");
    }

    #[test]
    fn paragraphs_are_grouped_up_to_limit() {
        let text = format!("{}\n\n{}\n\n\n\n{}", "a".repeat(10), "b".repeat(10), "c".repeat(30));
        let chunks = paragraph_chunks(&text, 25);
        assert_eq!(
            chunks,
            vec![format!("{}\n\n{}", "a".repeat(10), "b".repeat(10)), "c".repeat(30)]
        );
        assert!(paragraph_chunks("\n\n  \n\n", 25).is_empty());
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        for (start, end) in [(0, 1), (3, 2), (1, 6)] {
            let err = replace_lines(FILE, start, end, "x").unwrap_err();
            assert!(
                matches!(err, FsError::InvalidRange { len: 4, .. }),
                "{start}..={end}"
            );
        }
        assert!(replace_lines(FILE, 5, 5, "x").is_ok());
    }
}
