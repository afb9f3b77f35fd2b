//! Task categorization.
//!
//! A fixed, ordered table of `(label, regex)` pairs is matched against
//! the task title concatenated with its description. Every matching
//! label becomes a tag; a task matching nothing is tagged `general`.

use std::sync::OnceLock;

use regex::Regex;

/// Label attached when no category matches.
pub const GENERAL: &str = "general";

fn category_table() -> &'static Vec<(&'static str, Regex)> {
    static TABLE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            ("python", r"(?i)\b(python|django|flask|pytest|pip)\b|\.py\b"),
            (
                "javascript",
                r"(?i)\b(javascript|typescript|node|npm|react|vue)\b|\.[jt]sx?\b",
            ),
            ("web", r"(?i)\b(html|css|frontend|website|web|ui)\b"),
            ("api", r"(?i)\b(api|endpoint|rest|graphql|webhook)\b"),
            ("test", r"(?i)\b(test|tests|spec|coverage)\b"),
            ("refactor", r"(?i)\b(refactor|restructure|cleanup|clean up|simplify)\b"),
            ("docs", r"(?i)\b(docs?|documentation|readme|changelog)\b"),
            (
                "devops",
                r"(?i)\b(docker|deploy|deployment|ci|cd|pipeline|kubernetes|k8s)\b",
            ),
            ("data", r"(?i)\b(data|csv|json|sql|database|etl)\b"),
            ("tool", r"(?i)\b(tool|script|cli|utility|automation)\b"),
        ]
        .iter()
        .map(|(label, pattern)| (*label, Regex::new(pattern).expect("category regex compiles")))
        .collect()
    })
}

/// All category labels, in table order.
pub fn known_categories() -> Vec<&'static str> {
    category_table().iter().map(|(label, _)| *label).collect()
}

/// Attach every matching category label to `title ⊕ description`;
/// `general` when nothing matches.
pub fn classify(title: &str, description: &str) -> Vec<String> {
    let text = format!("{} {}", title, description);
    let mut tags: Vec<String> = category_table()
        .iter()
        .filter(|(_, re)| re.is_match(&text))
        .map(|(label, _)| label.to_string())
        .collect();
    if tags.is_empty() {
        tags.push(GENERAL.to_string());
    }
    tags
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_task() {
        let tags = classify("fix the Flask route", "returns 500 on POST");
        assert!(tags.contains(&"python".to_string()));
    }

    #[test]
    fn javascript_by_extension() {
        let tags = classify("write hello.js", "print hi to the console");
        assert!(tags.contains(&"javascript".to_string()));
    }

    #[test]
    fn multiple_labels_attach() {
        let tags = classify("add API tests", "cover the REST endpoint with pytest");
        assert!(tags.contains(&"api".to_string()));
        assert!(tags.contains(&"test".to_string()));
        assert!(tags.contains(&"python".to_string()));
    }

    #[test]
    fn labels_keep_table_order() {
        let tags = classify("test the api", "");
        // api precedes test in the table
        let api_pos = tags.iter().position(|t| t == "api").unwrap();
        let test_pos = tags.iter().position(|t| t == "test").unwrap();
        assert!(api_pos < test_pos);
    }

    #[test]
    fn case_insensitive() {
        let tags = classify("DOCKER deploy", "");
        assert!(tags.contains(&"devops".to_string()));
    }

    #[test]
    fn general_fallback() {
        let tags = classify("ponder the meaning of it all", "quietly");
        assert_eq!(tags, vec![GENERAL.to_string()]);
    }

    #[test]
    fn description_contributes() {
        let tags = classify("small chore", "update the README badges");
        assert!(tags.contains(&"docs".to_string()));
    }

    #[test]
    fn known_categories_count() {
        assert_eq!(known_categories().len(), 10);
    }
}
