//! Activation conditions.
//!
//! Each condition is a `kind:argument` string such as `onLanguage:python`.
//! The set of kinds an extension declares is kept separately so an incoming
//! signal can skip extensions that cannot possibly match it.

use std::collections::HashSet;

use luminex_core::TextDocument;

/// Category of an activation condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    Wildcard,
    Language,
    Command,
    FileSystem,
    WorkspaceContains,
    Other,
}

/// One declared activation condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationEvent {
    /// `*`
    Wildcard,
    /// `onLanguage:<language id or filetype>`
    OnLanguage(String),
    /// `onCommand:<command>`
    OnCommand(String),
    /// `onFileSystem:<uri scheme>`
    OnFileSystem(String),
    /// `workspaceContains:<glob>`
    WorkspaceContains(String),
    /// Anything else; kept but never matches
    Other(String),
}

impl ActivationEvent {
    /// Parses one condition. Empty strings are not conditions.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        if raw == "*" {
            return Some(Self::Wildcard);
        }

        let (kind, arg) = raw.split_once(':').unwrap_or((raw, ""));
        let arg = arg.to_string();
        Some(match kind {
            "onLanguage" => Self::OnLanguage(arg),
            "onCommand" => Self::OnCommand(arg),
            "onFileSystem" => Self::OnFileSystem(arg),
            "workspaceContains" => Self::WorkspaceContains(arg),
            _ => Self::Other(raw.to_string()),
        })
    }

    pub fn kind(&self) -> ActivationKind {
        match self {
            Self::Wildcard => ActivationKind::Wildcard,
            Self::OnLanguage(_) => ActivationKind::Language,
            Self::OnCommand(_) => ActivationKind::Command,
            Self::OnFileSystem(_) => ActivationKind::FileSystem,
            Self::WorkspaceContains(_) => ActivationKind::WorkspaceContains,
            Self::Other(_) => ActivationKind::Other,
        }
    }
}

/// The activation conditions of one extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationEvents {
    events: Vec<ActivationEvent>,
    kinds: HashSet<ActivationKind>,
}

impl ActivationEvents {
    pub fn new(raw: &[String]) -> Self {
        let events: Vec<ActivationEvent> =
            raw.iter().filter_map(|r| ActivationEvent::parse(r)).collect();
        let kinds = events.iter().map(ActivationEvent::kind).collect();
        Self { events, kinds }
    }

    pub fn events(&self) -> &[ActivationEvent] {
        &self.events
    }

    /// Activates as soon as the manager runs: no conditions, or `*`.
    pub fn is_eager(&self) -> bool {
        self.events.is_empty() || self.kinds.contains(&ActivationKind::Wildcard)
    }

    /// Fast filter: does any condition have this kind.
    pub fn has_kind(&self, kind: ActivationKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Language ids or filetypes named by `onLanguage`.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            ActivationEvent::OnLanguage(lang) if !lang.is_empty() => Some(lang.as_str()),
            _ => None,
        })
    }

    /// URI schemes named by `onFileSystem`.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            ActivationEvent::OnFileSystem(scheme) if !scheme.is_empty() => Some(scheme.as_str()),
            _ => None,
        })
    }

    /// Globs named by `workspaceContains`.
    pub fn workspace_patterns(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ActivationEvent::WorkspaceContains(glob) if !glob.is_empty() => Some(glob.clone()),
                _ => None,
            })
            .collect()
    }

    /// Matches the document's language id or filetype.
    pub fn matches_document(&self, document: &TextDocument) -> bool {
        self.languages()
            .any(|lang| lang == document.language_id || lang == document.filetype)
    }

    pub fn matches_command(&self, command: &str) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, ActivationEvent::OnCommand(c) if c == command))
    }

    pub fn matches_scheme(&self, scheme: &str) -> bool {
        self.schemes().any(|s| s == scheme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(raw: &[&str]) -> ActivationEvents {
        let raw: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
        ActivationEvents::new(&raw)
    }

    #[test]
    fn test_parse() {
        assert_eq!(ActivationEvent::parse(""), None);
        assert_eq!(ActivationEvent::parse("*"), Some(ActivationEvent::Wildcard));
        assert_eq!(
            ActivationEvent::parse("onLanguage:xml"),
            Some(ActivationEvent::OnLanguage("xml".into()))
        );
        assert_eq!(
            ActivationEvent::parse("workspaceContains:**/*.toml"),
            Some(ActivationEvent::WorkspaceContains("**/*.toml".into()))
        );
        assert_eq!(
            ActivationEvent::parse("onView:tree"),
            Some(ActivationEvent::Other("onView:tree".into()))
        );
    }

    #[test]
    fn test_eager() {
        assert!(events(&[]).is_eager());
        assert!(events(&[""]).is_eager());
        assert!(events(&["onCommand:x", "*"]).is_eager());
        assert!(!events(&["onCommand:x"]).is_eager());
    }

    #[test]
    fn test_matching() {
        let activation = events(&[
            "onLanguage:python",
            "onCommand:python.run",
            "onFileSystem:sftp",
            "workspaceContains:setup.py",
        ]);
        assert!(activation.has_kind(ActivationKind::Language));
        assert!(!activation.has_kind(ActivationKind::Wildcard));

        let py = TextDocument::new(1, "file:///a.py", "python", "python");
        let js = TextDocument::new(2, "file:///a.js", "javascript", "javascript");
        assert!(activation.matches_document(&py));
        assert!(!activation.matches_document(&js));

        // filetype alone is enough
        let ft = TextDocument::new(3, "file:///a", "plaintext", "python");
        assert!(activation.matches_document(&ft));

        assert!(activation.matches_command("python.run"));
        assert!(!activation.matches_command("python"));
        assert!(activation.matches_scheme("sftp"));
        assert!(!activation.matches_scheme("file"));
        assert_eq!(activation.workspace_patterns(), vec!["setup.py"]);
    }

    #[test]
    fn test_empty_arguments_never_match() {
        let activation = events(&["onLanguage", "workspaceContains:"]);
        let doc = TextDocument::new(1, "file:///a", "", "");
        assert!(!activation.matches_document(&doc));
        assert!(activation.workspace_patterns().is_empty());
        assert!(!activation.is_eager());
    }
}
