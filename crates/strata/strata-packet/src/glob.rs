//! Dependency-free glob matcher for stream-identifier patterns.
//!
//! Supports `*` (any run of characters, including none) and `?` (exactly one
//! character). Used by cursor `set_match`/`set_reject` and by `limitips`
//! policy patterns.

/// Returns true if `text` matches `pattern`, where `pattern` may contain
/// `*` and `?` wildcards. Matching is a classic DP over (text, pattern)
/// prefixes; `O(len(text) * len(pattern))`, fine for the short identifiers
/// involved here.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (plen, tlen) = (p.len(), t.len());

    let mut dp = vec![vec![false; tlen + 1]; plen + 1];
    dp[0][0] = true;
    for pi in 1..=plen {
        if p[pi - 1] == '*' {
            dp[pi][0] = dp[pi - 1][0];
        }
    }

    for pi in 1..=plen {
        for ti in 1..=tlen {
            dp[pi][ti] = match p[pi - 1] {
                '*' => dp[pi - 1][ti] || dp[pi][ti - 1],
                '?' => dp[pi - 1][ti - 1],
                c => dp[pi - 1][ti - 1] && c == t[ti - 1],
            };
        }
    }

    dp[plen][tlen]
}

/// Matches against a comma-separated list of glob patterns (the shape
/// `set_match`/`set_reject` patterns take once compiled from config).
pub fn glob_match_any(patterns: &str, text: &str) -> bool {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|p| glob_match(p, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_suffix() {
        assert!(glob_match("IU_ANMO_*", "IU_ANMO_00_BHZ"));
        assert!(glob_match("IU_*", "IU_ANMO_00_BHZ"));
        assert!(!glob_match("CI_*", "IU_ANMO_00_BHZ"));
    }

    #[test]
    fn question_matches_one_char() {
        assert!(glob_match("IU_ANMO_0?_BHZ", "IU_ANMO_00_BHZ"));
        assert!(!glob_match("IU_ANMO_0?_BHZ", "IU_ANMO_000_BHZ"));
    }

    #[test]
    fn exact_match_no_wildcards() {
        assert!(glob_match("IU_ANMO_00_BHZ", "IU_ANMO_00_BHZ"));
        assert!(!glob_match("IU_ANMO_00_BHZ", "IU_ANMO_00_BHN"));
    }

    #[test]
    fn any_of_list() {
        assert!(glob_match_any("CI_*, IU_ANMO_*", "IU_ANMO_00_BHZ"));
        assert!(!glob_match_any("CI_*, NN_*", "IU_ANMO_00_BHZ"));
    }
}
