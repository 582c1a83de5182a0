//! Keyword extraction shared by memory, reactions and the hashing embedder.
//! Whitespace + punctuation splitting, lowercase, stopwords dropped.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "and", "any", "are", "because", "been", "before", "being",
    "but", "can", "could", "did", "does", "doing", "for", "from", "had", "has", "have", "her",
    "here", "hers", "him", "his", "how", "into", "its", "just", "more", "most", "not", "now",
    "off", "once", "only", "our", "out", "over", "own", "same", "she", "should", "some", "such",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "too", "under", "until", "very", "was", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];

const MIN_KEYWORD_LEN: usize = 3;

/// Split text into words on whitespace and punctuation boundaries
pub fn split_words(text: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start {
            words.push(&text[s..i]);
            start = None;
        }
    }
    if let Some(s) = start {
        words.push(&text[s..]);
    }
    words
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Sorted, de-duplicated lowercase keywords
pub fn keywords(text: &str) -> Vec<String> {
    split_words(text)
        .into_iter()
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN && !is_stopword(w))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
