//! Keyword extraction for labelling topic clusters.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;

/// Tokens shorter than this carry too little meaning to label a topic.
const MIN_TOKEN_CHARS: usize = 3;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "your", "yours", "all", "any", "can",
        "had", "her", "was", "one", "our", "out", "has", "have", "him", "his", "how", "its",
        "may", "new", "now", "old", "see", "two", "way", "who", "did", "get", "got", "let",
        "say", "she", "too", "use", "used", "using", "that", "this", "with", "from", "they",
        "them", "then", "than", "there", "their", "these", "those", "what", "when", "where",
        "which", "while", "will", "would", "could", "should", "been", "being", "were", "into",
        "onto", "about", "above", "after", "again", "also", "just", "like", "more", "most",
        "much", "must", "only", "other", "over", "same", "some", "such", "very", "each",
        "here", "does", "doing", "done", "make", "made", "many", "want", "well", "because",
        "before", "below", "between", "both", "down", "during", "even", "every", "few",
        "further", "know", "need", "off", "once", "own", "really", "still", "sure", "thing",
        "things", "through", "under", "until", "upon", "why", "yes", "yet", "you're", "it's",
        "i'm", "don't", "can't", "into", "let's", "what's", "there's", "able", "ok", "okay",
        "please", "thanks", "thank", "hello", "hi", "hey",
    ]
    .into_iter()
    .collect()
});

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

/// Split text into lowercase alphanumeric tokens, dropping short tokens,
/// pure numbers and stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() >= MIN_TOKEN_CHARS)
        .map(|s| s.to_lowercase())
        .filter(|s| !s.chars().all(|c| c.is_numeric()))
        .filter(|s| !is_stop_word(s))
        .collect()
}

/// The `n` most frequent terms across `texts`. Ties are broken alphabetically.
pub fn top_terms<'a, I>(texts: I, n: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for text in texts {
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1;
        }
    }

    // BTreeMap iteration is alphabetical and the sort is stable
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().take(n).map(|(term, _)| term).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        assert_eq!(tokenize("FAISS indexes vectors"), vec!["faiss", "indexes", "vectors"]);
    }

    #[test]
    fn test_tokenize_filters_stop_words() {
        assert_eq!(tokenize("what is the best database"), vec!["best", "database"]);
    }

    #[test]
    fn test_tokenize_filters_short_and_numeric() {
        assert_eq!(tokenize("a db in 2024 v2 ok gpu"), vec!["gpu"]);
    }

    #[test]
    fn test_tokenize_handles_punctuation() {
        assert_eq!(tokenize("mind-map, (graph)!"), vec!["mind", "map", "graph"]);
    }

    #[test]
    fn test_top_terms_by_frequency() {
        let texts = ["vector search with faiss", "faiss vector index", "faiss"];
        let terms = top_terms(texts.iter().copied(), 2);
        assert_eq!(terms, vec!["faiss", "vector"]);
    }

    #[test]
    fn test_top_terms_ties_are_alphabetical() {
        let terms = top_terms(["zebra mango apple"].iter().copied(), 3);
        assert_eq!(terms, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_top_terms_empty() {
        assert!(top_terms(["the and of"].iter().copied(), 5).is_empty());
        assert!(top_terms(std::iter::empty(), 5).is_empty());
    }
}
