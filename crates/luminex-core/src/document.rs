//! Text documents as seen by the host, and selectors that match them.
//!
//! The host never owns buffer contents; it only needs to know which documents
//! are open, their language and their URI. Selectors score a document so
//! providers can be ranked, with `0` meaning "no match".

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// An open document reported by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocument {
    /// Editor buffer number
    pub bufnr: u32,

    /// Document URI (`file:///...`, `untitled:...`, ...)
    pub uri: String,

    /// Language identifier
    pub language_id: String,

    /// Editor filetype (often equal to the language id)
    pub filetype: String,
}

impl TextDocument {
    pub fn new(
        bufnr: u32,
        uri: impl Into<String>,
        language_id: impl Into<String>,
        filetype: impl Into<String>,
    ) -> Self {
        Self {
            bufnr,
            uri: uri.into(),
            language_id: language_id.into(),
            filetype: filetype.into(),
        }
    }

    /// Builds a document for a file on disk, detecting its language from the extension.
    pub fn from_path(bufnr: u32, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let language = path
            .extension()
            .and_then(|e| e.to_str())
            .map(language_from_extension)
            .unwrap_or_default();
        let uri = Url::from_file_path(path)
            .map(String::from)
            .unwrap_or_else(|_| format!("file://{}", path.display()));
        Self::new(bufnr, uri, language.clone(), language)
    }

    /// Returns the URI scheme, or an empty string if the URI does not parse.
    pub fn scheme(&self) -> String {
        Url::parse(&self.uri)
            .map(|u| u.scheme().to_string())
            .unwrap_or_default()
    }

    /// Returns the file system path for `file` URIs.
    pub fn fs_path(&self) -> Option<std::path::PathBuf> {
        Url::parse(&self.uri).ok()?.to_file_path().ok()
    }
}

/// Detects language from file extension.
pub fn language_from_extension(ext: &str) -> String {
    match ext.to_lowercase().as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "html" | "htm" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" => "cpp",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "sh" | "bash" | "zsh" => "sh",
        "xml" => "xml",
        other => return other.to_string(),
    }
    .to_string()
}

/// One clause of a document selector. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    /// Language id or filetype, `*` for any
    #[serde(default)]
    pub language: Option<String>,

    /// URI scheme, `*` for any
    #[serde(default)]
    pub scheme: Option<String>,

    /// Glob matched against the document's file path
    #[serde(default)]
    pub pattern: Option<String>,
}

impl DocumentFilter {
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::default()
        }
    }

    pub fn scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: Some(scheme.into()),
            ..Self::default()
        }
    }

    /// Scores one filter: 10 for an exact match, 5 for a wildcard, 0 for none.
    pub fn score(&self, document: &TextDocument) -> u32 {
        let mut score = 0;

        if let Some(scheme) = &self.scheme {
            if *scheme == document.scheme() {
                score = 10;
            } else if scheme == "*" {
                score = 5;
            } else {
                return 0;
            }
        }

        if let Some(language) = &self.language {
            if *language == document.language_id || *language == document.filetype {
                score = 10;
            } else if language == "*" {
                score = score.max(5);
            } else {
                return 0;
            }
        }

        if let Some(pattern) = &self.pattern {
            let matched = document
                .fs_path()
                .zip(glob::Pattern::new(pattern).ok())
                .is_some_and(|(path, glob)| glob.matches_path(&path));
            if matched {
                score = 10;
            } else {
                return 0;
            }
        }

        score
    }
}

/// A selector is a list of filters; the best scoring filter wins.
pub type DocumentSelector = Vec<DocumentFilter>;

/// Scores a document against a selector, `0` meaning no match.
pub fn score_selector(selector: &[DocumentFilter], document: &TextDocument) -> u32 {
    selector
        .iter()
        .map(|filter| filter.score(document))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_doc() -> TextDocument {
        TextDocument::new(1, "file:///tmp/app/main.py", "python", "python")
    }

    #[test]
    fn test_language_detection() {
        let doc = TextDocument::from_path(3, "/tmp/project/lib.rs");
        assert_eq!(doc.language_id, "rust");
        assert_eq!(doc.scheme(), "file");
        assert_eq!(doc.bufnr, 3);
    }

    #[test]
    fn test_scheme_of_untitled() {
        let doc = TextDocument::new(2, "untitled:Untitled-1", "", "");
        assert_eq!(doc.scheme(), "untitled");
    }

    #[test]
    fn test_filter_scores() {
        let doc = python_doc();
        assert_eq!(DocumentFilter::language("python").score(&doc), 10);
        assert_eq!(DocumentFilter::language("*").score(&doc), 5);
        assert_eq!(DocumentFilter::language("javascript").score(&doc), 0);
        assert_eq!(DocumentFilter::scheme("file").score(&doc), 10);
        assert_eq!(DocumentFilter::scheme("untitled").score(&doc), 0);

        let pattern = DocumentFilter {
            pattern: Some("/tmp/app/**/*.py".to_string()),
            ..DocumentFilter::default()
        };
        assert_eq!(pattern.score(&doc), 10);
    }

    #[test]
    fn test_selector_takes_best_filter() {
        let doc = python_doc();
        let selector = vec![DocumentFilter::language("*"), DocumentFilter::language("python")];
        assert_eq!(score_selector(&selector, &doc), 10);
        assert_eq!(score_selector(&[], &doc), 0);
    }
}
