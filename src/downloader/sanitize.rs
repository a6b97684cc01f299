// Title to filename normalization

use regex::Regex;

/// Longest filename stem we produce, in characters
pub const MAX_FILENAME_CHARS: usize = 200;

lazy_static::lazy_static! {
    static ref ILLEGAL_CHARS: Regex = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
}

/// Strip characters illegal on common filesystems, trim, cap the length.
/// Never fails; may return an empty string.
pub fn sanitize(title: &str) -> String {
    let cleaned = ILLEGAL_CHARS.replace_all(title, "");
    let truncated: String = cleaned.trim().chars().take(MAX_FILENAME_CHARS).collect();
    // truncation can expose trailing whitespace again
    truncated.trim_end().to_string()
}

/// Escape for use inside the service's output template, where `%` starts a field
pub fn escape_template(name: &str) -> String {
    name.replace('%', "%%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_illegal_characters() {
        assert_eq!(sanitize(r#"AC/DC: "Back|In*Black"? <live>\"#), "ACDC BackInBlack live");
    }

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(sanitize("   Song Title \t\n"), "Song Title");
        assert_eq!(sanitize("  ??  "), "");
    }

    #[test]
    fn test_truncates_by_characters() {
        let long = "é".repeat(250);
        let out = sanitize(&long);
        assert_eq!(out.chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn test_no_trailing_space_after_truncation() {
        let title = format!("{} tail", "a".repeat(199));
        let out = sanitize(&title);
        assert_eq!(out, "a".repeat(199));
    }

    #[test]
    fn test_output_properties_hold() {
        let samples = [
            "normal",
            "  <<>>  ",
            "日本語のタイトル | Official Video",
            "",
            "x".repeat(500).as_str(),
        ]
        .map(|s| s.to_string());
        for s in samples {
            let out = sanitize(&s);
            assert!(!out.contains(|c: char| "<>:\"/\\|?*".contains(c)));
            assert_eq!(out, out.trim());
            assert!(out.chars().count() <= MAX_FILENAME_CHARS);
        }
    }

    #[test]
    fn test_escape_template() {
        assert_eq!(escape_template("100% Hits"), "100%% Hits");
    }
}
