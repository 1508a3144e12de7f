//! Top-level declaration extraction for codebase outlines.
//!
//! Sources are scanned line by line with per-language patterns; nothing is
//! executed or fully parsed. Only declarations starting at column 0 count as
//! top-level.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Languages the outline understands, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Rust,
    JavaScript,
    TypeScript,
    Go,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "py" | "pyi" => Some(Language::Python),
            "rs" => Some(Language::Rust),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "go" => Some(Language::Go),
            _ => None,
        }
    }

    fn patterns(self) -> &'static (Regex, Regex) {
        match self {
            Language::Python => &PYTHON,
            Language::Rust => &RUST,
            Language::JavaScript | Language::TypeScript => &ECMASCRIPT,
            Language::Go => &GO,
        }
    }
}

/// Names declared at the top level of one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    /// Classes, structs, enums, traits, interfaces, type aliases.
    pub types: Vec<String>,
    /// Free functions (and Go methods).
    pub functions: Vec<String>,
}

impl Declarations {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.functions.is_empty()
    }
}

static PYTHON: LazyLock<(Regex, Regex)> = LazyLock::new(|| {
    (
        Regex::new(r"(?m)^class\s+([A-Za-z_]\w*)").unwrap(),
        Regex::new(r"(?m)^(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap(),
    )
});

static RUST: LazyLock<(Regex, Regex)> = LazyLock::new(|| {
    (
        Regex::new(
            r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union|type)\s+([A-Za-z_]\w*)",
        )
        .unwrap(),
        Regex::new(
            r#"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)"#,
        )
        .unwrap(),
    )
});

static ECMASCRIPT: LazyLock<(Regex, Regex)> = LazyLock::new(|| {
    (
        Regex::new(
            r"(?m)^(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:class|interface|enum|type)\s+([A-Za-z_$][\w$]*)",
        )
        .unwrap(),
        Regex::new(
            r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+([A-Za-z_$][\w$]*)",
        )
        .unwrap(),
    )
});

static GO: LazyLock<(Regex, Regex)> = LazyLock::new(|| {
    (
        Regex::new(r"(?m)^type\s+([A-Za-z_]\w*)").unwrap(),
        Regex::new(r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)").unwrap(),
    )
});

/// Extract top-level type and function names from `source`.
pub fn extract_declarations(language: Language, source: &str) -> Declarations {
    let (types_re, functions_re) = language.patterns();
    Declarations {
        types: captures(types_re, source),
        functions: captures(functions_re, source),
    }
}

fn captures(re: &Regex, source: &str) -> Vec<String> {
    re.captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_language_from_extension() {
        assert_eq!(
            Language::from_path(Path::new("src/app.py")),
            Some(Language::Python)
        );
        assert_eq!(
            Language::from_path(Path::new("web/index.tsx")),
            Some(Language::TypeScript)
        );
        assert_eq!(Language::from_path(Path::new("README.md")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn python_top_level_only() {
        let src = "import os\n\nclass Greeter:\n    def greet(self):\n        pass\n\nasync def main():\n    pass\n\ndef helper(x):\n    return x\n";
        let decls = extract_declarations(Language::Python, src);
        assert_eq!(decls.types, vec!["Greeter"]);
        assert_eq!(decls.functions, vec!["main", "helper"]);
    }

    #[test]
    fn rust_items_with_visibility() {
        let src = "pub struct Config {}\npub(crate) enum Mode { A }\ntrait Run {}\n\nimpl Config {\n    pub fn new() -> Self { Self {} }\n}\n\npub async fn serve() {}\nfn private() {}\n";
        let decls = extract_declarations(Language::Rust, src);
        assert_eq!(decls.types, vec!["Config", "Mode", "Run"]);
        assert_eq!(decls.functions, vec!["serve", "private"]);
    }

    #[test]
    fn typescript_exports() {
        let src = "export interface Props {}\nexport default class App {}\nexport async function load() {}\nfunction local() {}\nconst arrow = () => {};\n";
        let decls = extract_declarations(Language::TypeScript, src);
        assert_eq!(decls.types, vec!["Props", "App"]);
        assert_eq!(decls.functions, vec!["load", "local"]);
    }

    #[test]
    fn go_methods_and_types() {
        let src = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Start() {}\nfunc main() {}\n";
        let decls = extract_declarations(Language::Go, src);
        assert_eq!(decls.types, vec!["Server"]);
        assert_eq!(decls.functions, vec!["Start", "main"]);
    }

    #[test]
    fn empty_source_has_no_declarations() {
        assert!(extract_declarations(Language::Python, "").is_empty());
    }
}
