//! Topic matching: exact set membership, or a compiled wildcard pattern
//! (`*` -> any run of characters, `?` -> exactly one character).

use std::collections::HashSet;

use regex::Regex;

pub struct TopicMatcher {
    exact: HashSet<String>,
    patterns: Vec<Regex>,
}

impl TopicMatcher {
    pub fn new(topics: &[String]) -> Self {
        let mut exact = HashSet::new();
        let mut patterns = Vec::new();
        for topic in topics {
            if topic.contains('*') || topic.contains('?') {
                patterns.push(compile_wildcard(topic));
            } else {
                exact.insert(topic.clone());
            }
        }
        Self { exact, patterns }
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.exact.contains(topic) || self.patterns.iter().any(|re| re.is_match(topic))
    }
}

fn compile_wildcard(pattern: &str) -> Regex {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).expect("wildcard pattern compiles to a valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let m = TopicMatcher::new(&["order.created".to_string()]);
        assert!(m.matches("order.created"));
        assert!(!m.matches("order.updated"));
    }

    #[test]
    fn seed_scenario_wildcard_subscription() {
        let m = TopicMatcher::new(&["user.*".to_string(), "order.*.created".to_string()]);
        let published = [
            "user.login",
            "user.logout",
            "order.123.created",
            "order.123.updated",
            "product.view",
        ];
        let matched: Vec<&str> = published.into_iter().filter(|t| m.matches(t)).collect();
        assert_eq!(matched, vec!["user.login", "user.logout", "order.123.created"]);
    }

    #[test]
    fn question_mark_matches_single_char() {
        let m = TopicMatcher::new(&["a?c".to_string()]);
        assert!(m.matches("abc"));
        assert!(!m.matches("abbc"));
    }

    #[test]
    fn regex_metacharacters_in_pattern_are_escaped() {
        let m = TopicMatcher::new(&["a.b*".to_string()]);
        assert!(m.matches("a.bxyz"));
        assert!(!m.matches("axbxyz"));
    }
}
