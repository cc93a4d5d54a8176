//! Keyword-based intent matching
//!
//! Compiles a category -> keywords dictionary into case-insensitive,
//! word-bounded patterns. The category with the most keyword hits wins;
//! ties go to the category that sorts first.

use regex::Regex;
use std::collections::BTreeMap;

use crate::TemplateError;

pub struct IntentMatcher {
    rules: Vec<(String, Vec<Regex>)>,
}

impl IntentMatcher {
    pub fn new(keywords: &BTreeMap<String, Vec<String>>) -> Result<Self, TemplateError> {
        let mut rules = Vec::with_capacity(keywords.len());

        for (category, words) in keywords {
            let mut patterns = Vec::with_capacity(words.len());
            for word in words {
                let word = word.trim();
                if word.is_empty() {
                    continue;
                }
                patterns.push(Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))?);
            }
            if !patterns.is_empty() {
                rules.push((category.clone(), patterns));
            }
        }

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Category with the most keyword hits in `text`, if any
    pub fn best_match(&self, text: &str) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;

        for (category, patterns) in &self.rules {
            let hits = patterns.iter().filter(|p| p.is_match(text)).count();
            if hits == 0 {
                continue;
            }
            match best {
                Some((_, best_hits)) if best_hits >= hits => {}
                _ => best = Some((category.as_str(), hits)),
            }
        }

        best.map(|(category, _)| category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> BTreeMap<String, Vec<String>> {
        let mut dict = BTreeMap::new();
        dict.insert(
            "URGENT".to_string(),
            vec!["no heat".to_string(), "gas smell".to_string()],
        );
        dict.insert(
            "SALES".to_string(),
            vec!["quote".to_string(), "estimate".to_string()],
        );
        dict
    }

    #[test]
    fn test_best_match_counts_hits() {
        let matcher = IntentMatcher::new(&dictionary()).unwrap();
        assert_eq!(
            matcher.best_match("We have NO HEAT and a gas smell, also want a quote"),
            Some("URGENT")
        );
        assert_eq!(matcher.best_match("Can I get an estimate?"), Some("SALES"));
        assert_eq!(matcher.best_match("hello there"), None);
    }

    #[test]
    fn test_word_boundaries() {
        let matcher = IntentMatcher::new(&dictionary()).unwrap();
        assert_eq!(matcher.best_match("misquoted"), None);
    }

    #[test]
    fn test_tie_goes_to_first_category() {
        let matcher = IntentMatcher::new(&dictionary()).unwrap();
        // One hit each; "SALES" sorts before "URGENT"
        assert_eq!(matcher.best_match("quote for no heat"), Some("SALES"));
    }

    #[test]
    fn test_blank_keywords_ignored() {
        let mut dict = BTreeMap::new();
        dict.insert("MISC".to_string(), vec!["  ".to_string()]);
        let matcher = IntentMatcher::new(&dict).unwrap();
        assert!(matcher.is_empty());
    }
}
