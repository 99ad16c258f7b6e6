//! Small string helpers shared by prompt rendering and the policy rules.
//!
//! All length limits are in characters, not bytes: most text in a turn is
//! CJK and must never be split inside a code point.

/// The first `max` characters of `s`.
pub fn clip(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Clip and mark the cut with `…` when anything was removed.
pub fn clip_with_ellipsis(s: &str, max: usize) -> String {
    let clipped = clip(s, max);
    if clipped.len() < s.len() {
        format!("{clipped}…")
    } else {
        clipped.to_string()
    }
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Collapse every whitespace run (including newlines) to a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when `haystack` contains any of `needles` (literal match).
pub fn contains_any<S: AsRef<str>>(haystack: &str, needles: &[S]) -> bool {
    needles.iter().any(|n| {
        let n = n.as_ref();
        !n.is_empty() && haystack.contains(n)
    })
}

/// Case-insensitive variant of [`contains_any`] for ASCII keywords mixed
/// with CJK ones.
pub fn contains_any_ci<S: AsRef<str>>(haystack: &str, needles: &[S]) -> bool {
    let lowered = haystack.to_lowercase();
    needles.iter().any(|n| {
        let n = n.as_ref().to_lowercase();
        !n.is_empty() && lowered.contains(&n)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_counts_characters() {
        assert_eq!(clip("分镜故事板", 2), "分镜");
        assert_eq!(clip("abc", 10), "abc");
        assert_eq!(clip("", 3), "");
        assert_eq!(clip_with_ellipsis("分镜故事板", 2), "分镜…");
        assert_eq!(clip_with_ellipsis("ab", 2), "ab");
    }

    #[test]
    fn whitespace_collapse() {
        assert_eq!(collapse_whitespace("  好的 \n\t 继续 "), "好的 继续");
        assert_eq!(char_len(&collapse_whitespace("好 的")), 3);
    }

    #[test]
    fn keyword_matching() {
        assert!(contains_any("帮我做九宫格分镜", &["九宫格"]));
        assert!(!contains_any("随便聊聊", &["", "分镜"]));
        assert!(contains_any_ci("make a Storyboard", &["storyboard"]));
    }
}
