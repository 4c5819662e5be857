//! Query keyword extraction for the substring search path.

const STOP_WORDS: &[&str] = &[
    "how", "do", "does", "i", "a", "an", "the", "is", "in", "on", "with", "what", "where",
    "which", "for", "and", "are", "can",
];

const MIN_KEYWORD_LEN: usize = 3;

/// Lowercased identifier-like words of `query`, minus stop words and words
/// shorter than three characters, followed by simple singular variants
/// (`numbers` → `number`, `parsing` → `pars`). Order is preserved, duplicates dropped.
#[must_use]
pub fn extract_keywords(query: &str) -> Vec<String> {
    fn push(word: &str, out: &mut Vec<String>) {
        if word.len() >= MIN_KEYWORD_LEN && !out.iter().any(|w| w == word) {
            out.push(word.to_owned());
        }
    }

    let mut out: Vec<String> = Vec::new();
    let words: Vec<String> = query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect();

    for word in &words {
        push(word, &mut out);
    }
    for word in &words {
        if let Some(stem) = word.strip_suffix("ing") {
            push(stem, &mut out);
        }
        if let Some(stem) = word.strip_suffix('s')
            && !stem.ends_with('s')
        {
            push(stem, &mut out);
        }
    }
    out
}

/// Number of distinct `keywords` occurring in `text`, case-insensitively.
#[must_use]
pub fn count_matches(text: &str, keywords: &[String]) -> usize {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| haystack.contains(k.as_str()))
        .count()
}
