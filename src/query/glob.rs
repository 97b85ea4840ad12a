//! Compiled glob patterns arranged as a tree of path segments.
//!
//! Patterns that share leading segments share nodes, so a traversal of the
//! view visits each common prefix directory once. A segment containing `**`
//! ends the tree: the rest of the pattern is matched against whole paths
//! below that node.

use std::ffi::{OsStr, OsString};
use std::path::{Component, Path};

use globset::{GlobBuilder, GlobMatcher};

use crate::error::QueryError;

fn is_literal(segment: &str) -> bool {
    !segment.contains(['*', '?', '[', ']', '{', '}', '\\'])
}

fn compile(pattern: &str, case_sensitive: bool) -> Result<GlobMatcher, QueryError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .case_insensitive(!case_sensitive)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| QueryError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn is_dotfile(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

/// A recursive remainder such as `**/*.rs`, matched against paths relative
/// to the node that holds it.
#[derive(Debug)]
pub struct DoublestarMatch {
    pattern: String,
    matcher: GlobMatcher,
    /// For `**/name` with a literal `name`, the only base name that can match.
    anchored_name: Option<OsString>,
    /// The final segment names dotfiles explicitly.
    tail_is_dotted: bool,
}

impl DoublestarMatch {
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether a file at `relative` (below the owning node) matches.
    #[must_use]
    pub fn matches(&self, relative: &Path, include_dotfiles: bool) -> bool {
        if let Some(anchored) = &self.anchored_name {
            if relative.file_name() != Some(anchored.as_os_str()) {
                return false;
            }
        }
        if !include_dotfiles {
            let mut components = relative.components().peekable();
            while let Some(Component::Normal(name)) = components.next() {
                let is_last = components.peek().is_none();
                if is_dotfile(name) && !(is_last && self.tail_is_dotted) {
                    return false;
                }
            }
        }
        self.matcher.is_match(relative)
    }

    /// Whether descending into a directory named `name` can still produce a
    /// match.
    #[must_use]
    pub fn may_descend_into(&self, name: &OsStr, include_dotfiles: bool) -> bool {
        include_dotfiles || !is_dotfile(name)
    }
}

/// One path segment of one or more patterns.
#[derive(Debug)]
pub struct GlobNode {
    segment: String,
    matcher: Option<GlobMatcher>,
    /// Some pattern ends at this segment.
    is_leaf: bool,
    children: Vec<GlobNode>,
    doublestars: Vec<DoublestarMatch>,
}

impl GlobNode {
    fn new(segment: &str, case_sensitive: bool) -> Result<Self, QueryError> {
        let matcher = if case_sensitive && is_literal(segment) {
            None
        } else {
            Some(compile(segment, case_sensitive)?)
        };
        Ok(Self {
            segment: segment.to_string(),
            matcher,
            is_leaf: false,
            children: Vec::new(),
            doublestars: Vec::new(),
        })
    }

    /// The exact child name this segment matches, when it is a literal.
    #[must_use]
    pub fn literal(&self) -> Option<&OsStr> {
        self.matcher.is_none().then(|| OsStr::new(self.segment.as_str()))
    }

    #[must_use]
    pub fn matches_name(&self, name: &OsStr, include_dotfiles: bool) -> bool {
        match &self.matcher {
            None => name == OsStr::new(self.segment.as_str()),
            Some(matcher) => {
                if is_dotfile(name) && !include_dotfiles && !self.segment.starts_with('.') {
                    return false;
                }
                matcher.is_match(name)
            }
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    #[must_use]
    pub fn doublestars(&self) -> &[DoublestarMatch] {
        &self.doublestars
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty() || !self.doublestars.is_empty()
    }
}

/// A set of glob patterns compiled for traversal.
#[derive(Debug)]
pub struct GlobTree {
    root: GlobNode,
    include_dotfiles: bool,
}

impl GlobTree {
    /// Compile `patterns`, which are relative to the query root.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidGlob` for a pattern that does not compile.
    pub fn new<S: AsRef<str>>(
        patterns: &[S],
        include_dotfiles: bool,
        case_sensitive: bool,
    ) -> Result<Self, QueryError> {
        let mut root = GlobNode::new("", true)?;
        for pattern in patterns {
            add_pattern(&mut root, pattern.as_ref(), case_sensitive)?;
        }
        Ok(Self {
            root,
            include_dotfiles,
        })
    }

    #[must_use]
    pub const fn root(&self) -> &GlobNode {
        &self.root
    }

    #[must_use]
    pub const fn include_dotfiles(&self) -> bool {
        self.include_dotfiles
    }
}

fn add_pattern(root: &mut GlobNode, pattern: &str, case_sensitive: bool) -> Result<(), QueryError> {
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(QueryError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: "empty pattern".to_string(),
        });
    }

    let mut node = root;
    for (i, segment) in segments.iter().enumerate() {
        if segment.contains("**") {
            let remainder = segments[i..].join("/");
            let tail = segments[segments.len() - 1];
            let anchored = segments.len() == i + 2
                && *segment == "**"
                && is_literal(tail)
                && case_sensitive;
            let anchored_name = anchored.then(|| OsString::from(tail));
            node.doublestars.push(DoublestarMatch {
                matcher: compile(&remainder, case_sensitive)?,
                pattern: remainder,
                anchored_name,
                tail_is_dotted: tail.starts_with('.'),
            });
            return Ok(());
        }

        let position = node.children.iter().position(|c| c.segment == *segment);
        let index = match position {
            Some(index) => index,
            None => {
                node.children.push(GlobNode::new(segment, case_sensitive)?);
                node.children.len() - 1
            }
        };
        node = &mut node.children[index];
    }
    node.is_leaf = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    impl GlobTree {
        /// Whether a single relative path matches any pattern.
        fn matches(&self, relative: &Path) -> bool {
            let names: Vec<&OsStr> = relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(name) => Some(name),
                    _ => None,
                })
                .collect();
            self.matches_from(&self.root, &names)
        }

        fn matches_from(&self, node: &GlobNode, names: &[&OsStr]) -> bool {
            let Some((first, rest)) = names.split_first() else {
                return false;
            };

            let remainder: std::path::PathBuf = names.iter().collect();
            if node
                .doublestars
                .iter()
                .any(|d| d.matches(&remainder, self.include_dotfiles))
            {
                return true;
            }

            node.children.iter().any(|child| {
                child.matches_name(first, self.include_dotfiles)
                    && if rest.is_empty() {
                        child.is_leaf
                    } else {
                        self.matches_from(child, rest)
                    }
            })
        }
    }

    fn tree(patterns: &[&str]) -> GlobTree {
        GlobTree::new(patterns, false, true).unwrap()
    }

    #[test]
    fn test_shared_prefixes_share_nodes() {
        let t = tree(&["src/*.rs", "src/lib/*.rs", "docs/*.md"]);
        assert_eq!(t.root().children().len(), 2);
        let src = &t.root().children()[0];
        assert_eq!(src.literal(), Some(OsStr::new("src")));
        assert_eq!(src.children().len(), 2);
    }

    #[test]
    fn test_single_segment_wildcards() {
        let t = tree(&["src/*.rs"]);
        assert!(t.matches(Path::new("src/main.rs")));
        assert!(!t.matches(Path::new("src/nested/main.rs")));
        assert!(!t.matches(Path::new("main.rs")));
    }

    #[test]
    fn test_doublestar() {
        let t = tree(&["**/*.rs"]);
        assert!(t.matches(Path::new("main.rs")));
        assert!(t.matches(Path::new("a/b/c.rs")));
        assert!(!t.matches(Path::new("a/b/c.txt")));
    }

    #[test]
    fn test_doublestar_under_prefix() {
        let t = tree(&["src/**/*.rs"]);
        assert!(t.matches(Path::new("src/x/y.rs")));
        assert!(t.matches(Path::new("src/y.rs")));
        assert!(!t.matches(Path::new("tests/y.rs")));
    }

    #[test]
    fn test_anchored_doublestar() {
        let t = tree(&["**/Cargo.toml"]);
        let ds = &t.root().doublestars()[0];
        assert_eq!(ds.anchored_name.as_deref(), Some(OsStr::new("Cargo.toml")));
        assert!(t.matches(Path::new("crates/x/Cargo.toml")));
        assert!(!t.matches(Path::new("crates/x/Cargo.lock")));
    }

    #[test]
    fn test_dotfiles_excluded_by_default() {
        let t = tree(&["*", "**/*.txt"]);
        assert!(!t.matches(Path::new(".hidden")));
        assert!(!t.matches(Path::new(".git/a.txt")));
        assert!(t.matches(Path::new("visible")));

        let with_dots = GlobTree::new(&["*"], true, true).unwrap();
        assert!(with_dots.matches(Path::new(".hidden")));
    }

    #[test]
    fn test_explicit_dot_pattern_matches_dotfiles() {
        let t = tree(&[".git*", "**/.env"]);
        assert!(t.matches(Path::new(".gitignore")));
        assert!(t.matches(Path::new("app/.env")));
    }

    #[test]
    fn test_case_insensitive() {
        let t = GlobTree::new(&["README.md"], false, false).unwrap();
        assert!(t.matches(Path::new("readme.MD")));
        assert!(t.root().children()[0].literal().is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = GlobTree::new(&["src/[abc"], false, true).unwrap_err();
        assert!(matches!(err, QueryError::InvalidGlob { .. }));
        assert!(GlobTree::new(&["/"], false, true).is_err());
    }
}
