//! Filesystem access confined to a single sandbox root.
//!
//! Every path is resolved component by component against the canonical root:
//! symlinks are followed to their canonical target, `..` is applied after
//! resolution, and the result must still lie under the root. Anything else is
//! a [`FsError::SandboxViolation`]; nothing is ever clamped back into the root.

use std::fmt::Write as _;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::chunk::{number_lines, paragraph_chunks, replace_lines};
use crate::core::outline::{Declarations, Language, extract_declarations};
use crate::error::FsError;

/// Source files larger than this are listed as skipped in outlines.
pub const MAX_OUTLINE_FILE_BYTES: u64 = 1_000_000;
/// Files larger than this are never fed to a semantic index.
pub const MAX_INDEX_FILE_BYTES: u64 = 5_000_000;
/// Target size of one semantic-index chunk, in characters.
pub const INDEX_CHUNK_CHARS: usize = 1_000;

const INDEXED_EXTENSIONS: [&str; 6] = ["py", "md", "rs", "ts", "js", "txt"];

/// Filesystem view rooted at a canonical directory.
pub struct ConfinedFs {
    root: PathBuf,
    semantic_index: Option<Box<dyn SemanticIndex>>,
}

impl std::fmt::Debug for ConfinedFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfinedFs")
            .field("root", &self.root)
            .field("semantic_index", &self.semantic_index.is_some())
            .finish()
    }
}

impl ConfinedFs {
    /// Confine operations to `root`, which must be an existing directory.
    pub fn new(root: &Path) -> Result<Self, FsError> {
        let canonical = root.canonicalize().map_err(|e| match e.kind() {
            ErrorKind::NotFound => FsError::NotFound {
                path: root.to_path_buf(),
            },
            _ => FsError::io(format!("canonicalize {}", root.display()), e),
        })?;
        if !canonical.is_dir() {
            return Err(FsError::NotFound {
                path: root.to_path_buf(),
            });
        }
        Ok(Self {
            root: canonical,
            semantic_index: None,
        })
    }

    /// Attach a semantic search backend.
    pub fn with_semantic_index(mut self, index: Box<dyn SemanticIndex>) -> Self {
        self.semantic_index = Some(index);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `rel` to an absolute path that is guaranteed to lie under the root.
    ///
    /// Paths that do not exist yet resolve lexically below their deepest
    /// existing ancestor. Dangling symlinks cannot be proven to stay inside
    /// the root and are rejected.
    pub fn resolve(&self, rel: impl AsRef<Path>) -> Result<PathBuf, FsError> {
        let rel = rel.as_ref();
        let mut resolved = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Prefix(prefix) => resolved = PathBuf::from(prefix.as_os_str()),
                Component::RootDir => resolved.push(Component::RootDir),
                Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(name) => {
                    let candidate = resolved.join(name);
                    resolved = match fs::symlink_metadata(&candidate) {
                        Ok(meta) if meta.file_type().is_symlink() => {
                            match candidate.canonicalize() {
                                Ok(target) => target,
                                Err(_) => return Err(self.violation(rel)),
                            }
                        }
                        Ok(_) => candidate,
                        Err(e) if e.kind() == ErrorKind::NotFound => candidate,
                        Err(e) => {
                            return Err(FsError::io(
                                format!("inspect {}", candidate.display()),
                                e,
                            ));
                        }
                    };
                }
            }
        }
        if !resolved.starts_with(&self.root) {
            warn!(path = %rel.display(), resolved = %resolved.display(), "sandbox violation");
            return Err(self.violation(rel));
        }
        Ok(resolved)
    }

    /// Read a whole UTF-8 file.
    #[instrument(skip_all, fields(path = %rel.as_ref().display()))]
    pub fn read_file(&self, rel: impl AsRef<Path>) -> Result<String, FsError> {
        let target = self.existing_file(rel.as_ref())?;
        fs::read_to_string(&target).map_err(|e| FsError::io(format!("read {}", target.display()), e))
    }

    /// Write a whole file, creating parent directories as needed.
    ///
    /// The content lands in a temporary file next to the target and is renamed
    /// over it, so readers never observe a partial file.
    #[instrument(skip_all, fields(path = %rel.as_ref().display(), bytes = content.len()))]
    pub fn write_file(&self, rel: impl AsRef<Path>, content: &str) -> Result<(), FsError> {
        let target = self.resolve(rel.as_ref())?;
        write_atomic(&target, content)?;
        debug!(path = %target.display(), "file written");
        Ok(())
    }

    /// Recursive, indented listing of a directory.
    ///
    /// Hidden directories (`.git` and friends) are skipped. Symlinks are
    /// never descended into; ones pointing outside the root are flagged.
    #[instrument(skip_all, fields(path = %rel.as_ref().display()))]
    pub fn list_tree(&self, rel: impl AsRef<Path>) -> Result<String, FsError> {
        let dir = self.existing_dir(rel.as_ref())?;
        let mut lines = Vec::new();
        for entry in walk(&dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let indent = "    ".repeat(e.depth());
                    lines.push(format!("{indent}(unreadable: {e})"));
                    continue;
                }
            };
            let indent = "    ".repeat(entry.depth());
            let name = display_name(&entry);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                lines.push(format!("{indent}{name}/"));
            } else if file_type.is_symlink() {
                lines.push(format!("{indent}{}", self.describe_symlink(&entry, &name)));
            } else {
                lines.push(format!("{indent}{name}"));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Declaration outline of every source file under `rel`.
    #[instrument(skip_all, fields(path = %rel.as_ref().display()))]
    pub fn read_outline(&self, rel: impl AsRef<Path>) -> Result<Outline, FsError> {
        let dir = self.existing_dir(rel.as_ref())?;
        let mut entries = Vec::new();
        for entry in walk(&dir).filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(language) = Language::from_path(entry.path()) else {
                continue;
            };
            let path = self.relative(entry.path());
            let kind = outline_file(&entry, language);
            if matches!(&kind, OutlineKind::Parsed(decls) if decls.is_empty()) {
                continue;
            }
            entries.push(OutlineEntry { path, kind });
        }
        debug!(entries = entries.len(), "outline built");
        Ok(Outline { entries })
    }

    /// Lines `start..=end` (1-indexed), each prefixed with its line number.
    pub fn read_chunk(
        &self,
        rel: impl AsRef<Path>,
        start: usize,
        end: usize,
    ) -> Result<String, FsError> {
        let contents = self.read_file(rel)?;
        number_lines(&contents, start, end)
    }

    /// Replace lines `start..=end` of an existing file with `new_content`.
    #[instrument(skip_all, fields(path = %rel.as_ref().display(), start, end))]
    pub fn edit_chunk(
        &self,
        rel: impl AsRef<Path>,
        start: usize,
        end: usize,
        new_content: &str,
    ) -> Result<(), FsError> {
        let target = self.existing_file(rel.as_ref())?;
        let contents = fs::read_to_string(&target)
            .map_err(|e| FsError::io(format!("read {}", target.display()), e))?;
        let updated = replace_lines(&contents, start, end, new_content)?;
        write_atomic(&target, &updated)
    }

    /// Semantic search over the sandbox, if a backend is attached.
    ///
    /// Without a backend this reports `Unsupported` instead of an empty hit
    /// list, so callers can tell "nothing matched" from "cannot search".
    #[instrument(skip_all, fields(top_k))]
    pub fn search_semantic(&self, query: &str, top_k: usize) -> anyhow::Result<SemanticSearch> {
        let Some(index) = self.semantic_index.as_deref() else {
            return Ok(SemanticSearch::Unsupported {
                reason: "no semantic index backend is configured".to_string(),
            });
        };
        if index.is_empty() {
            let documents = self.collect_documents();
            if documents.is_empty() {
                return Ok(SemanticSearch::Hits(Vec::new()));
            }
            debug!(documents = documents.len(), "indexing sandbox");
            index.index(documents).context("index sandbox documents")?;
        }
        let hits = index.query(query, top_k).context("query semantic index")?;
        Ok(SemanticSearch::Hits(hits))
    }

    fn collect_documents(&self) -> Vec<Document> {
        let mut documents = Vec::new();
        for entry in walk(&self.root).filter_map(Result::ok) {
            if !entry.file_type().is_file() || !is_indexed_file(entry.path()) {
                continue;
            }
            if entry
                .metadata()
                .ok()
                .is_none_or(|meta| meta.len() > MAX_INDEX_FILE_BYTES)
            {
                continue;
            }
            let Ok(bytes) = fs::read(entry.path()) else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            let file = self.relative(entry.path());
            for (chunk, text) in paragraph_chunks(&text, INDEX_CHUNK_CHARS)
                .into_iter()
                .enumerate()
            {
                documents.push(Document {
                    file: file.clone(),
                    chunk,
                    text,
                });
            }
        }
        documents
    }

    fn existing_file(&self, rel: &Path) -> Result<PathBuf, FsError> {
        let target = self.resolve(rel)?;
        if !target.is_file() {
            return Err(FsError::NotFound {
                path: rel.to_path_buf(),
            });
        }
        Ok(target)
    }

    fn existing_dir(&self, rel: &Path) -> Result<PathBuf, FsError> {
        let target = self.resolve(rel)?;
        if !target.is_dir() {
            return Err(FsError::NotFound {
                path: rel.to_path_buf(),
            });
        }
        Ok(target)
    }

    fn describe_symlink(&self, entry: &DirEntry, name: &str) -> String {
        let rel = self.relative(entry.path());
        match self.resolve(&rel) {
            Ok(target) => format!("{name} -> {}", self.relative(&target).display()),
            Err(_) => format!("{name} -> (outside sandbox)"),
        }
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    fn violation(&self, rel: &Path) -> FsError {
        FsError::SandboxViolation {
            path: rel.to_path_buf(),
            root: self.root.clone(),
        }
    }
}

fn walk(dir: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden_dir(entry))
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

fn display_name(entry: &DirEntry) -> String {
    entry.file_name().to_string_lossy().into_owned()
}

fn is_indexed_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| INDEXED_EXTENSIONS.contains(&ext))
}

fn outline_file(entry: &DirEntry, language: Language) -> OutlineKind {
    let size = match entry.metadata() {
        Ok(meta) => meta.len(),
        Err(e) => {
            return OutlineKind::Failed {
                reason: e.to_string(),
            };
        }
    };
    if size > MAX_OUTLINE_FILE_BYTES {
        return OutlineKind::Skipped { size };
    }
    let bytes = match fs::read(entry.path()) {
        Ok(bytes) => bytes,
        Err(e) => {
            return OutlineKind::Failed {
                reason: e.to_string(),
            };
        }
    };
    match String::from_utf8(bytes) {
        Ok(source) => OutlineKind::Parsed(extract_declarations(language, &source)),
        Err(e) => OutlineKind::Failed {
            reason: format!("invalid UTF-8: {e}"),
        },
    }
}

fn write_atomic(target: &Path, content: &str) -> Result<(), FsError> {
    let parent = target.parent().ok_or_else(|| {
        FsError::io(
            format!("resolve parent of {}", target.display()),
            std::io::Error::from(ErrorKind::InvalidInput),
        )
    })?;
    fs::create_dir_all(parent)
        .map_err(|e| FsError::io(format!("create directory {}", parent.display()), e))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|e| FsError::io(format!("create temp file in {}", parent.display()), e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| FsError::io(format!("write temp file for {}", target.display()), e))?;
    if let Ok(meta) = fs::metadata(target) {
        fs::set_permissions(tmp.path(), meta.permissions())
            .map_err(|e| FsError::io(format!("copy permissions of {}", target.display()), e))?;
    }
    tmp.persist(target)
        .map_err(|e| FsError::io(format!("replace {}", target.display()), e.error))?;
    Ok(())
}

/// Outline of the source files under a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    pub entries: Vec<OutlineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    /// Path relative to the sandbox root.
    pub path: PathBuf,
    pub kind: OutlineKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineKind {
    Parsed(Declarations),
    /// Larger than [`MAX_OUTLINE_FILE_BYTES`]; not read.
    Skipped { size: u64 },
    Failed { reason: String },
}

impl Outline {
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "No source files found or parsed.".to_string();
        }
        let mut out = String::new();
        for entry in &self.entries {
            let path = entry.path.display();
            match &entry.kind {
                OutlineKind::Parsed(decls) => {
                    let _ = writeln!(out, "File: {path}");
                    if !decls.types.is_empty() {
                        let _ = writeln!(out, "  Types: {}", decls.types.join(", "));
                    }
                    if !decls.functions.is_empty() {
                        let _ = writeln!(out, "  Functions: {}", decls.functions.join(", "));
                    }
                }
                OutlineKind::Skipped { size } => {
                    let _ = writeln!(out, "File: {path} (Skipped: {size} bytes exceeds 1MB)");
                }
                OutlineKind::Failed { reason } => {
                    let _ = writeln!(out, "File: {path} (Failed to parse: {reason})");
                }
            }
        }
        out.truncate(out.trim_end().len());
        out
    }
}

/// One indexable chunk of a sandbox file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub file: PathBuf,
    pub chunk: usize,
    pub text: String,
}

/// Ranked match returned by a semantic index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub file: PathBuf,
    pub chunk: usize,
    pub text: String,
    pub score: f32,
}

/// Embedding-backed search over sandbox documents.
pub trait SemanticIndex: Send + Sync {
    fn is_empty(&self) -> bool;
    fn index(&self, documents: Vec<Document>) -> anyhow::Result<()>;
    fn query(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticSearch {
    Unsupported { reason: String },
    Hits(Vec<SearchHit>),
}

impl SemanticSearch {
    pub fn render(&self, query: &str) -> String {
        match self {
            SemanticSearch::Unsupported { reason } => {
                format!("Semantic search unsupported: {reason}")
            }
            SemanticSearch::Hits(hits) if hits.is_empty() => {
                format!("No matches for '{query}'.")
            }
            SemanticSearch::Hits(hits) => {
                let mut out = format!("--- Semantic Search Results for '{query}' ---\n");
                for hit in hits {
                    let _ = write!(
                        out,
                        "\nFile: {} (Chunk {}):\n{}\n",
                        hit.file.display(),
                        hit.chunk,
                        hit.text
                    );
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sandbox() -> (tempfile::TempDir, ConfinedFs) {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("repo")).expect("mkdir");
        let cfs = ConfinedFs::new(&temp.path().join("repo")).expect("sandbox");
        (temp, cfs)
    }

    #[test]
    fn resolve_inside_root_keeps_canonical_prefix() {
        let (_temp, cfs) = sandbox();
        for rel in ["a.txt", "./src/lib.rs", "src/../b.txt", "new/dir/c.txt", ""] {
            let resolved = cfs.resolve(rel).expect(rel);
            assert!(resolved.starts_with(cfs.root()), "{rel}");
        }
    }

    #[test]
    fn resolve_rejects_parent_traversal() {
        let (_temp, cfs) = sandbox();
        for rel in ["..", "../outside.txt", "src/../../x", "a/b/../../../y"] {
            let err = cfs.resolve(rel).unwrap_err();
            assert!(err.is_safety_violation(), "{rel}");
        }
    }

    #[test]
    fn resolve_rejects_absolute_paths_outside_root() {
        let (_temp, cfs) = sandbox();
        let err = cfs.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, FsError::SandboxViolation { .. }));
        let inside = cfs.root().join("ok.txt");
        assert_eq!(cfs.resolve(&inside).expect("inside"), inside);
    }

    #[test]
    fn reentering_root_after_leaving_is_allowed() {
        let (_temp, cfs) = sandbox();
        let resolved = cfs.resolve("../repo/file.txt").expect("resolve");
        assert_eq!(resolved, cfs.root().join("file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escapes() {
        let (temp, cfs) = sandbox();
        let outside = temp.path().join("secret");
        fs::create_dir_all(&outside).expect("mkdir");
        fs::write(outside.join("key.txt"), "secret").expect("write");
        std::os::unix::fs::symlink(&outside, cfs.root().join("link")).expect("symlink");
        std::os::unix::fs::symlink(temp.path().join("missing"), cfs.root().join("dangling"))
            .expect("symlink");

        assert!(cfs.resolve("link").unwrap_err().is_safety_violation());
        assert!(cfs.resolve("link/key.txt").unwrap_err().is_safety_violation());
        assert!(cfs.resolve("dangling").unwrap_err().is_safety_violation());
        assert!(cfs.read_file("link/key.txt").unwrap_err().is_safety_violation());
        assert!(
            cfs.write_file("link/new.txt", "x")
                .unwrap_err()
                .is_safety_violation()
        );
        assert!(!outside.join("new.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_follows_symlinks_inside_root() {
        let (_temp, cfs) = sandbox();
        fs::create_dir_all(cfs.root().join("real")).expect("mkdir");
        std::os::unix::fs::symlink(cfs.root().join("real"), cfs.root().join("alias"))
            .expect("symlink");
        let resolved = cfs.resolve("alias/f.txt").expect("resolve");
        assert_eq!(resolved, cfs.root().join("real/f.txt"));
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let (_temp, cfs) = sandbox();
        let err = cfs.read_file("nope.txt").unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
    }

    #[test]
    fn write_creates_parents_and_overwrites() {
        let (_temp, cfs) = sandbox();
        cfs.write_file("pkg/mod/a.py", "first\n").expect("write");
        cfs.write_file("pkg/mod/a.py", "second\n").expect("overwrite");
        assert_eq!(cfs.read_file("pkg/mod/a.py").expect("read"), "second\n");
        let leftovers: Vec<_> = fs::read_dir(cfs.root().join("pkg/mod"))
            .expect("read dir")
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files must not linger");
    }

    #[test]
    fn list_tree_skips_hidden_directories() {
        let (_temp, cfs) = sandbox();
        cfs.write_file("src/main.py", "").expect("write");
        cfs.write_file(".git/HEAD", "ref").expect("write");
        cfs.write_file(".gitignore", "target\n").expect("write");
        cfs.write_file("README.md", "").expect("write");

        let tree = cfs.list_tree(".").expect("tree");
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(
            lines,
            vec!["repo/", "    .gitignore", "    README.md", "    src/", "        main.py"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn list_tree_flags_escaping_symlinks() {
        let (temp, cfs) = sandbox();
        std::os::unix::fs::symlink(temp.path(), cfs.root().join("up")).expect("symlink");
        let tree = cfs.list_tree("").expect("tree");
        assert!(tree.contains("up -> (outside sandbox)"));
    }

    #[test]
    fn list_tree_of_missing_dir_is_not_found() {
        let (_temp, cfs) = sandbox();
        assert!(matches!(
            cfs.list_tree("missing").unwrap_err(),
            FsError::NotFound { .. }
        ));
    }

    #[test]
    fn outline_reports_parsed_skipped_and_failed_files() {
        let (_temp, cfs) = sandbox();
        cfs.write_file("app.py", "class App:\n    pass\n\ndef main():\n    pass\n")
            .expect("write");
        cfs.write_file("empty.py", "x = 1\n").expect("write");
        cfs.write_file("notes.txt", "def not_code():\n").expect("write");
        let big = format!("def huge():\n{}", "#".repeat(1_000_001));
        cfs.write_file("big.py", &big).expect("write");
        fs::write(cfs.root().join("bad.rs"), [0xff, 0xfe, b'\n']).expect("write");

        let outline = cfs.read_outline(".").expect("outline");
        let paths: Vec<String> = outline
            .entries
            .iter()
            .map(|e| e.path.display().to_string())
            .collect();
        assert_eq!(paths, vec!["app.py", "bad.rs", "big.py"]);
        assert!(matches!(outline.entries[1].kind, OutlineKind::Failed { .. }));
        assert!(matches!(outline.entries[2].kind, OutlineKind::Skipped { .. }));

        let rendered = outline.render();
        assert!(rendered.contains("File: app.py\n  Types: App\n  Functions: main"));
        assert!(rendered.contains("big.py (Skipped"));
        assert!(rendered.contains("bad.rs (Failed to parse"));
    }

    #[test]
    fn outline_of_empty_dir_says_so() {
        let (_temp, cfs) = sandbox();
        let outline = cfs.read_outline("").expect("outline");
        assert_eq!(outline.render(), "No source files found or parsed.");
    }

    #[test]
    fn read_chunk_numbers_lines() {
        let (_temp, cfs) = sandbox();
        cfs.write_file("f.txt", "a\nb\nc\n").expect("write");
        assert_eq!(cfs.read_chunk("f.txt", 2, 3).expect("chunk"), "2: b\n3: c\n");
    }

    #[test]
    fn edit_chunk_round_trip() {
        let (_temp, cfs) = sandbox();
        let original: Vec<String> = (1..=6).map(|i| format!("line {i}")).collect();
        let contents = format!("{}\n", original.join("\n"));
        for k in 1..=original.len() {
            cfs.write_file("f.txt", &contents).expect("write");
            cfs.edit_chunk("f.txt", k, k, "X").expect("edit");
            let mut expected = original.clone();
            expected[k - 1] = "X".to_string();
            assert_eq!(
                cfs.read_file("f.txt").expect("read"),
                format!("{}\n", expected.join("\n")),
                "k={k}"
            );
        }
    }

    #[test]
    fn edit_chunk_never_creates_files() {
        let (_temp, cfs) = sandbox();
        let err = cfs.edit_chunk("new.txt", 1, 1, "x").unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
        assert!(!cfs.root().join("new.txt").exists());
    }

    #[test]
    fn edit_chunk_rejects_bad_ranges_without_writing() {
        let (_temp, cfs) = sandbox();
        cfs.write_file("f.txt", "a\nb\n").expect("write");
        for (start, end) in [(0, 1), (2, 1), (1, 4)] {
            let err = cfs.edit_chunk("f.txt", start, end, "x").unwrap_err();
            assert!(matches!(err, FsError::InvalidRange { .. }));
        }
        assert_eq!(cfs.read_file("f.txt").expect("read"), "a\nb\n");
    }

    #[test]
    fn search_without_backend_is_unsupported() {
        let (_temp, cfs) = sandbox();
        let result = cfs.search_semantic("login", 5).expect("search");
        assert!(matches!(result, SemanticSearch::Unsupported { .. }));
        assert!(result.render("login").contains("unsupported"));
    }

    #[derive(Default)]
    struct KeywordIndex {
        documents: Mutex<Vec<Document>>,
    }

    impl SemanticIndex for KeywordIndex {
        fn is_empty(&self) -> bool {
            self.documents.lock().expect("lock").is_empty()
        }

        fn index(&self, documents: Vec<Document>) -> anyhow::Result<()> {
            self.documents.lock().expect("lock").extend(documents);
            Ok(())
        }

        fn query(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<SearchHit>> {
            Ok(self
                .documents
                .lock()
                .expect("lock")
                .iter()
                .filter(|doc| doc.text.contains(query))
                .take(top_k)
                .map(|doc| SearchHit {
                    file: doc.file.clone(),
                    chunk: doc.chunk,
                    text: doc.text.clone(),
                    score: 1.0,
                })
                .collect())
        }
    }

    #[test]
    fn search_indexes_sandbox_once_and_queries_backend() {
        let (_temp, cfs) = sandbox();
        cfs.write_file("auth.py", "def login():\n    pass\n").expect("write");
        cfs.write_file("image.png", "login").expect("write");
        let cfs = cfs.with_semantic_index(Box::new(KeywordIndex::default()));

        let result = cfs.search_semantic("login", 5).expect("search");
        let SemanticSearch::Hits(hits) = &result else {
            panic!("expected hits, got {result:?}");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, PathBuf::from("auth.py"));
        assert!(result.render("login").contains("File: auth.py (Chunk 0)"));
    }
}
