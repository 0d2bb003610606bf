//! Wildcard event routing
//!
//! Subscription keys are simple globs where `*` matches any run of
//! characters. Resolution results are memoized per event name and the memo is
//! dropped whole whenever the subscription set changes.

use regex::Regex;
use std::collections::HashMap;
use tracing::trace;

/// Check whether `candidate` matches the glob `pattern`
///
/// `*` matches zero or more characters, everything else matches literally.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let expression = format!("(?s)^{}$", escaped.join(".*"));

    Regex::new(&expression)
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}

/// Memoizing resolver from event names to matching subscription keys
#[derive(Debug, Clone, Default)]
pub struct WildcardRouter {
    memo: HashMap<String, Vec<String>>,
}

impl WildcardRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key in `keys` whose pattern matches `event`, in key order
    pub fn resolve<'a, I>(&mut self, event: &str, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        if let Some(cached) = self.memo.get(event) {
            return cached.clone();
        }

        let matched: Vec<String> = keys
            .into_iter()
            .filter(|key| matches(key, event))
            .cloned()
            .collect();

        trace!(target: "router", "Resolved {} to {:?}", event, matched);
        self.memo.insert(event.to_string(), matched.clone());
        matched
    }

    /// Memoized result for `event`, if any
    pub fn cached(&self, event: &str) -> Option<&[String]> {
        self.memo.get(event).map(Vec::as_slice)
    }

    /// Forget every memoized result
    pub fn invalidate(&mut self) {
        self.memo.clear();
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_wildcard() {
        assert!(matches("guild*", "guildMemberAdd"));
        assert!(matches("guild*", "guild"));
        assert!(!matches("guild*", "Guild"));
        assert!(!matches("guild*", "myguild"));
    }

    #[test]
    fn test_star_matches_everything() {
        assert!(matches("*", ""));
        assert!(matches("*", "ready"));
        assert!(matches("*", "line\nbreak"));
    }

    #[test]
    fn test_literal_pattern() {
        assert!(matches("ready", "ready"));
        assert!(!matches("ready", "ready2"));
        assert!(!matches("ready", "read"));
    }

    #[test]
    fn test_inner_wildcards() {
        assert!(matches("message*Add", "messageReactionAdd"));
        assert!(matches("message*Add", "messageAdd"));
        assert!(!matches("message*Add", "messageReactionRemove"));
        assert!(matches("*Update*", "guildUpdateLate"));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "axb"));
        assert!(matches("(x)+[y]", "(x)+[y]"));
        assert!(matches("$^?*", "$^?anything"));
    }

    #[test]
    fn test_resolve_is_memoized() {
        let mut router = WildcardRouter::new();
        let keys = vec!["guild*".to_string(), "ready".to_string()];

        let matched = router.resolve("guildCreate", &keys);
        assert_eq!(matched, vec!["guild*"]);
        assert_eq!(router.cached("guildCreate"), Some(&["guild*".to_string()][..]));

        // The memo wins until invalidated, even if the keys change
        let more_keys = vec!["*".to_string(), "guild*".to_string()];
        assert_eq!(router.resolve("guildCreate", &more_keys), vec!["guild*"]);

        router.invalidate();
        assert_eq!(router.memo_len(), 0);
        assert_eq!(router.resolve("guildCreate", &more_keys), vec!["*", "guild*"]);
    }

    #[test]
    fn test_unmatched_events_are_memoized_too() {
        let mut router = WildcardRouter::new();
        let keys = vec!["ready".to_string()];

        assert!(router.resolve("messageCreate", &keys).is_empty());
        assert_eq!(router.cached("messageCreate"), Some(&[][..]));
    }
}
