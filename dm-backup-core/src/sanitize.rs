//! Display-name sanitisation and archive entry paths.

use std::sync::LazyLock;

use regex::Regex;

/// Longest segment, in characters, that survives sanitisation.
pub const MAX_SEGMENT_CHARS: usize = 255;

static ILLEGAL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[<>:"/\\|?*\p{Cc}]"#).expect("illegal-character pattern is a valid regex")
});

/// Replaces characters that are illegal in common filesystem/archive entry names with `_`
/// and truncates the result to [`MAX_SEGMENT_CHARS`] characters.
///
/// Idempotent: `sanitize_name(&sanitize_name(x)) == sanitize_name(x)`.
pub fn sanitize_name(name: &str) -> String {
    let replaced = ILLEGAL_CHARS.replace_all(name, "_");
    match replaced.char_indices().nth(MAX_SEGMENT_CHARS) {
        Some((cut, _)) => replaced[..cut].to_string(),
        None => replaced.into_owned(),
    }
}

/// Sanitised segment that is also safe as a directory component: never empty, never `.`/`..`.
fn path_segment(name: &str) -> String {
    let clean = sanitize_name(name);
    match clean.as_str() {
        "" | "." => "_".to_string(),
        ".." => "__".to_string(),
        _ => clean,
    }
}

/// Chain of sanitised ancestor names from the traversal root to the current node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePath {
    segments: Vec<String>,
}

impl ArchivePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// A new path one level deeper, named after an (unsanitised) display name.
    pub fn child(&self, display_name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(path_segment(display_name));
        Self { segments }
    }

    /// Entry name for a file directly under this path.
    pub fn entry_name(&self, display_name: &str) -> String {
        self.child(display_name).to_string()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl std::fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
