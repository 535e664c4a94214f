use regex::{Regex, RegexBuilder};

/// Builds the case-insensitive regex used to highlight search hits in the
/// register list. The query is a plain substring, never a pattern, so it
/// is escaped wholesale; blank queries produce no highlighter.
pub fn build_match_regex(query: &str) -> Option<Regex> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(trimmed))
        .case_insensitive(true)
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_queries_produce_no_highlighter() {
        assert!(build_match_regex("").is_none());
        assert!(build_match_regex("   ").is_none());
    }

    #[test]
    fn matches_are_case_insensitive() {
        let regex = build_match_regex("soc").expect("regex");
        let hits: Vec<_> = regex.find_iter("SOC 2 scoping").map(|m| m.as_str()).collect();
        assert_eq!(hits, vec!["SOC"]);
    }

    #[test]
    fn metacharacters_are_treated_literally() {
        let regex = build_match_regex("a.b").expect("regex");
        assert!(regex.is_match("a.b"));
        assert!(!regex.is_match("aXb"));
    }
}
