//! Parser for `FILE:` / `CONTENT:` / `END` blocks in a completion.
//!
//! ```text
//! FILE: src/hello.py
//! CONTENT:
//! print("hello")
//! END
//! ```
//!
//! Text outside blocks is ignored. Every block yields either a [`FileBlock`]
//! or a reason it was malformed.

/// One complete file proposed by a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    /// Full file contents, newline-terminated.
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBlocks {
    pub blocks: Vec<FileBlock>,
    pub malformed: Vec<String>,
}

pub fn parse_file_blocks(text: &str) -> ParsedBlocks {
    let mut parsed = ParsedBlocks::default();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(path) = line.trim().strip_prefix("FILE:") else {
            continue;
        };
        let path = path.trim().to_string();
        if path.is_empty() {
            parsed.malformed.push("FILE: line without a path".to_string());
            continue;
        }
        if lines.peek().map(|l| l.trim()) != Some("CONTENT:") {
            parsed
                .malformed
                .push(format!("{path}: expected CONTENT: after FILE:"));
            continue;
        }
        lines.next();

        let mut body = Vec::new();
        let mut terminated = false;
        for line in lines.by_ref() {
            if line.trim_end() == "END" {
                terminated = true;
                break;
            }
            body.push(line);
        }
        if !terminated {
            parsed.malformed.push(format!("{path}: missing END"));
            break;
        }

        let mut content = body.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        parsed.blocks.push(FileBlock { path, content });
    }
    parsed
}
