use regex::Regex;

use crate::error::{HiveError, HiveResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Empty,
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    Disallowed { pattern: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Empty => write!(f, "it was empty"),
            Violation::TooShort { len, min } => {
                write!(f, "it was too short ({len} characters, minimum {min})")
            }
            Violation::TooLong { len, max } => {
                write!(f, "it was too long ({len} characters, maximum {max})")
            }
            Violation::Disallowed { pattern } => {
                write!(f, "it contained disallowed content matching {pattern}")
            }
        }
    }
}

/// Length and content rules applied to generated text
#[derive(Debug, Clone)]
pub struct OutputConstraints {
    pub min_chars: usize,
    pub max_chars: usize,
    disallowed: Vec<Regex>,
}

impl OutputConstraints {
    pub fn new(min_chars: usize, max_chars: usize, patterns: &[String]) -> HiveResult<Self> {
        let disallowed = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| HiveError::Config(format!("invalid pattern {p:?}: {e}")))
            })
            .collect::<HiveResult<Vec<_>>>()?;
        Ok(Self {
            min_chars,
            max_chars,
            disallowed,
        })
    }

    /// Trim whitespace, strip wrapping quotes and collapse runs of whitespace
    pub fn clean(text: &str) -> String {
        let mut s = text.trim();
        loop {
            let stripped = strip_wrapping(s);
            if stripped.len() == s.len() {
                break;
            }
            s = stripped.trim();
        }
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn check(&self, text: &str) -> Result<(), Violation> {
        let len = text.chars().count();
        if len == 0 {
            return Err(Violation::Empty);
        }
        if len < self.min_chars {
            return Err(Violation::TooShort {
                len,
                min: self.min_chars,
            });
        }
        if len > self.max_chars {
            return Err(Violation::TooLong {
                len,
                max: self.max_chars,
            });
        }
        if let Some(re) = self.disallowed.iter().find(|re| re.is_match(text)) {
            return Err(Violation::Disallowed {
                pattern: re.as_str().to_string(),
            });
        }
        Ok(())
    }
}

fn strip_wrapping(s: &str) -> &str {
    const PAIRS: [(char, char); 4] = [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}'), ('`', '`')];
    for (open, close) in PAIRS {
        if s.chars().count() >= 2 && s.starts_with(open) && s.ends_with(close) {
            return &s[open.len_utf8()..s.len() - close.len_utf8()];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> OutputConstraints {
        OutputConstraints::new(2, 20, &[r"(?i)\bas an ai\b".to_string()]).unwrap()
    }

    #[test]
    fn clean_strips_quotes_and_whitespace() {
        assert_eq!(OutputConstraints::clean("  \"Hello   world\"  "), "Hello world");
        assert_eq!(OutputConstraints::clean("'\"nested\"'"), "nested");
        assert_eq!(OutputConstraints::clean("\u{201c}smart\u{201d}"), "smart");
        assert_eq!(OutputConstraints::clean("\""), "\"");
        assert_eq!(OutputConstraints::clean("don't stop"), "don't stop");
    }

    #[test]
    fn check_lengths() {
        let c = constraints();
        assert_eq!(c.check(""), Err(Violation::Empty));
        assert!(matches!(c.check("a"), Err(Violation::TooShort { .. })));
        assert!(matches!(
            c.check("this sentence is definitely too long"),
            Err(Violation::TooLong { max: 20, .. })
        ));
        assert!(c.check("fine").is_ok());
    }

    #[test]
    fn check_patterns() {
        let c = constraints();
        let err = c.check("As an AI I think").unwrap_err();
        assert!(err.to_string().contains("disallowed"));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = OutputConstraints::new(1, 10, &["(".to_string()]).unwrap_err();
        assert!(matches!(err, HiveError::Config(_)));
    }
}
