//! Pattern-Based Threat Detection
//!
//! Maps a single request field value to the list of threat categories it
//! matches. The taxonomy is a fixed, ordered table of category -> pattern
//! list; patterns are compiled once at construction. Within a category the
//! first matching pattern wins, so a call yields at most one detection per
//! category but may detect several distinct categories.
//!
//! The detector holds no mutable state and is safe to share across tasks
//! without synchronization.

use super::ThreatKind;
use regex::Regex;
use std::time::SystemTime;

/// Ordered category table. Matching is case-insensitive and tolerates the
/// malicious fragment being embedded in a longer value.
const PATTERN_TABLE: &[(ThreatKind, &[&str])] = &[
    (
        ThreatKind::SqlInjection,
        &[
            r"(?i)\bunion\s+(all\s+)?select\b",
            r"(?i)'\s*(or|and)\s+[^=]*=",
            r"(?i);\s*(drop|delete|insert|update|alter|truncate)\b",
            r"(?i)(\b(sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b)",
            r"(?i)\b(information_schema|sysobjects|mysql\.user)\b",
            r"(?i)\b(exec|execute)\s+(xp_|sp_)",
        ],
    ),
    (
        ThreatKind::Xss,
        &[
            r"(?i)<\s*script",
            r"(?i)\bjavascript\s*:",
            r"(?i)\bon(error|load|click|mouseover|focus)\s*=",
            r"(?i)<\s*(iframe|img|svg|embed|object)\b[^>]*\bon\w+\s*=",
            r"(?i)document\s*\.\s*(cookie|write|location)",
            r"(?i)\b(alert|prompt|confirm)\s*\(",
        ],
    ),
    (
        ThreatKind::PathTraversal,
        &[
            r"\.\./|\.\.\\",
            r"(?i)%2e%2e(%2f|%5c|/)",
            r"(?i)/(etc/(passwd|shadow|hosts)|proc/self|windows/system32)",
            r"%00",
        ],
    ),
    (
        ThreatKind::CommandInjection,
        &[
            r"(?i)[;&|`]\s*(cat|ls|id|whoami|wget|curl|nc|bash|sh|python|perl)\b",
            r"\$\(|`[^`]+`",
            r"(?i)\b(system|exec|passthru|shell_exec|popen)\s*\(",
            r"(?i)(\|\||&&)\s*(rm|chmod|chown|kill)\b",
        ],
    ),
    (
        ThreatKind::LdapInjection,
        &[
            r"\(\s*[|&]\s*\(",
            r"(?i)\(\s*\w+\s*=\s*\*\s*\)",
            r"(?i)\)\s*\(\s*\w+\s*=",
        ],
    ),
];

/// One matched threat from a single field.
#[derive(Debug, Clone)]
pub struct ThreatEvent {
    pub kind: ThreatKind,
    pub matched: String,
    pub field: String,
    pub timestamp: SystemTime,
}

/// Result of inspecting a single input value.
#[derive(Debug, Clone)]
pub struct Detection {
    pub is_malicious: bool,
    pub threats: Vec<ThreatEvent>,
}

impl Detection {
    fn clean() -> Self {
        Self {
            is_malicious: false,
            threats: Vec::new(),
        }
    }
}

struct CategoryRules {
    kind: ThreatKind,
    patterns: Vec<Regex>,
}

/// Stateless threat detector over a compiled pattern taxonomy.
pub struct ThreatDetector {
    categories: Vec<CategoryRules>,
}

impl ThreatDetector {
    /// Compile the built-in taxonomy. Patterns are static, so a compile
    /// failure here is a programming error.
    pub fn new() -> Self {
        let categories = PATTERN_TABLE
            .iter()
            .map(|(kind, patterns)| CategoryRules {
                kind: *kind,
                patterns: patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("invalid built-in threat pattern"))
                    .collect(),
            })
            .collect();

        Self { categories }
    }

    /// Inspect one field value. Empty input is never malicious.
    pub fn detect(&self, input: &str, field: &str) -> Detection {
        if input.is_empty() {
            return Detection::clean();
        }

        let mut threats = Vec::new();
        for category in &self.categories {
            for pattern in &category.patterns {
                if let Some(found) = pattern.find(input) {
                    threats.push(ThreatEvent {
                        kind: category.kind,
                        matched: found.as_str().to_string(),
                        field: field.to_string(),
                        timestamp: SystemTime::now(),
                    });
                    // One detection per category, keep scanning the rest
                    break;
                }
            }
        }

        Detection {
            is_malicious: !threats.is_empty(),
            threats,
        }
    }
}

impl Default for ThreatDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_inputs_are_clean() {
        let detector = ThreatDetector::new();

        for input in ["43.5", "Paris", "New York", "-12.75", "London,GB", ""] {
            let detection = detector.detect(input, "query.city");
            assert!(!detection.is_malicious, "false positive on {:?}", input);
            assert!(detection.threats.is_empty());
        }
    }

    #[test]
    fn test_classic_sql_tautology() {
        let detector = ThreatDetector::new();
        let detection = detector.detect("1' OR '1'='1", "query.lat");

        assert!(detection.is_malicious);
        assert_eq!(detection.threats.len(), 1);
        assert_eq!(detection.threats[0].kind, ThreatKind::SqlInjection);
        assert_eq!(detection.threats[0].field, "query.lat");
    }

    #[test]
    fn test_union_select_case_insensitive() {
        let detector = ThreatDetector::new();

        assert!(detector.detect("x UNION SELECT password FROM users", "q").is_malicious);
        assert!(detector.detect("x union select 1,2,3", "q").is_malicious);
    }

    #[test]
    fn test_xss_script_tag() {
        let detector = ThreatDetector::new();
        let detection = detector.detect("<ScRiPt>alert(1)</script>", "body.name");

        assert!(detection.is_malicious);
        assert_eq!(detection.threats[0].kind, ThreatKind::Xss);
    }

    #[test]
    fn test_path_traversal_embedded() {
        let detector = ThreatDetector::new();
        let detection = detector.detect("static/../../etc/passwd", "query.file");

        assert!(detection.is_malicious);
        assert_eq!(detection.threats[0].kind, ThreatKind::PathTraversal);
    }

    #[test]
    fn test_command_injection() {
        let detector = ThreatDetector::new();
        let detection = detector.detect("Paris; cat /tmp/keys", "query.city");

        assert!(detection
            .threats
            .iter()
            .any(|t| t.kind == ThreatKind::CommandInjection));
    }

    #[test]
    fn test_ldap_filter_injection() {
        let detector = ThreatDetector::new();
        let detection = detector.detect("admin)(uid=*)", "query.user");

        assert!(detection
            .threats
            .iter()
            .any(|t| t.kind == ThreatKind::LdapInjection));
    }

    #[test]
    fn test_multiple_categories_in_one_input() {
        let detector = ThreatDetector::new();
        let detection = detector.detect("<script>x</script>' OR '1'='1", "q");

        let kinds: Vec<ThreatKind> = detection.threats.iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&ThreatKind::SqlInjection));
        assert!(kinds.contains(&ThreatKind::Xss));
    }

    #[test]
    fn test_detection_is_deterministic() {
        let detector = ThreatDetector::new();
        let input = "../secret' OR 'a'='a";

        let first = detector.detect(input, "f");
        let second = detector.detect(input, "f");

        assert_eq!(first.threats.len(), second.threats.len());
        for (a, b) in first.threats.iter().zip(second.threats.iter()) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.matched, b.matched);
        }
    }

    #[test]
    fn test_category_order_is_stable() {
        let detector = ThreatDetector::new();
        let detection = detector.detect("<script>' OR '1'='1 ../x", "q");

        // sql_injection first, then xss, then path_traversal per taxonomy order
        let kinds: Vec<ThreatKind> = detection.threats.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ThreatKind::SqlInjection,
                ThreatKind::Xss,
                ThreatKind::PathTraversal
            ]
        );
    }
}
