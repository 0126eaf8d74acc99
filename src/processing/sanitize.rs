//! Helpers for normalizing caller-supplied names.

/// Sanitize arbitrary string input by trimming whitespace and dropping empties.
pub(crate) fn sanitize_string(value: Option<String>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Reduce an uploaded filename to a safe basename.
///
/// Directory components are dropped, whitespace becomes `_`, and anything outside ASCII
/// alphanumerics, `.`, `-`, and `_` is removed. Leading dots are stripped so the result can
/// never name a hidden file or walk up a directory. Returns `None` when nothing remains.
pub fn sanitize_filename(value: &str) -> Option<String> {
    let basename = value.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = basename
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    sanitize_string(Some(cleaned.trim_start_matches('.').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_string_trims_and_drops_empty() {
        assert_eq!(sanitize_string(Some("  gpt4 ".into())), Some("gpt4".into()));
        assert!(sanitize_string(Some("   ".into())).is_none());
        assert!(sanitize_string(None).is_none());
    }

    #[test]
    fn filenames_lose_directories_and_unsafe_characters() {
        assert_eq!(
            sanitize_filename("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\My Notes (v2).md").as_deref(),
            Some("My_Notes_v2.md")
        );
        assert_eq!(sanitize_filename("..hidden").as_deref(), Some("hidden"));
        assert!(sanitize_filename("").is_none());
        assert!(sanitize_filename("../").is_none());
    }
}
