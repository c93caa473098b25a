//! Text and URL similarity primitives used by deduplication and reporting.
//!
//! All functions are pure and operate on lower-cased input. Scores are in
//! `0.0..=1.0` where `1.0` means identical.

use std::collections::HashSet;

use reqwest::Url;

/// Shortest word accepted as an abbreviation of a longer one ("intro").
const MIN_ABBREVIATION_LEN: usize = 5;

/// Length ratio (shorter / longer) above which edit distance is blended in.
const EDIT_DISTANCE_LENGTH_RATIO: f64 = 0.7;

/// Strings longer than this skip the quadratic edit distance.
const EDIT_DISTANCE_MAX_LEN: usize = 1000;

/// Query parameters that carry tracking state rather than content identity.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "dclid", "yclid", "mc_cid", "mc_eid", "ref", "ref_src", "_ga",
    "_hsenc", "_hsmi", "igshid",
];

/// Levenshtein edit distance counted in characters.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Edit distance normalised by the longer string's length.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(&a, &b) as f64 / max_len as f64
}

/// Lower-cased word set with surrounding punctuation removed.
pub fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard similarity of the two texts' word sets.
///
/// Returns `1.0` when both are empty and `0.0` when only one is.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    set_jaccard(&word_set(a), &word_set(b))
}

fn set_jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Character n-grams of the whitespace-collapsed, lower-cased text.
pub fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let collapsed = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let chars: Vec<char> = collapsed.chars().collect();

    if chars.is_empty() || n == 0 {
        return HashSet::new();
    }
    if chars.len() < n {
        return HashSet::from([collapsed]);
    }

    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Jaccard similarity over character n-grams.
pub fn ngram_similarity(a: &str, b: &str, n: usize) -> f64 {
    set_jaccard(&char_ngrams(a, n), &char_ngrams(b, n))
}

/// Fraction of `needle`'s n-grams that also occur in `haystack`.
pub fn ngram_containment(needle: &str, haystack: &str, n: usize) -> f64 {
    let needle = char_ngrams(needle, n);
    if needle.is_empty() {
        return 0.0;
    }
    let haystack = char_ngrams(haystack, n);
    needle.intersection(&haystack).count() as f64 / needle.len() as f64
}

/// Blended similarity used for titles and snippets.
///
/// Word-set Jaccard, averaged with normalised edit distance when the two
/// strings have comparable lengths.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 && len_b == 0 {
        return 1.0;
    }
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let jaccard = jaccard_similarity(&a, &b);
    let shorter = len_a.min(len_b) as f64;
    let longer = len_a.max(len_b);

    if shorter / longer as f64 >= EDIT_DISTANCE_LENGTH_RATIO && longer <= EDIT_DISTANCE_MAX_LEN {
        (jaccard + levenshtein_similarity(&a, &b)) / 2.0
    } else {
        jaccard
    }
}

fn is_abbreviation(short: &str, long: &str) -> bool {
    short.chars().count() >= MIN_ABBREVIATION_LEN && long.starts_with(short)
}

/// Word-set Jaccard where a word also matches a longer word it abbreviates.
///
/// Exact matches are paired first; each word pairs at most once.
pub fn abbreviation_jaccard(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let exact = a.intersection(&b).count();
    let mut rest_b: Vec<&String> = b.difference(&a).collect();
    let mut prefixed = 0;
    for word in a.difference(&b) {
        let pair = rest_b
            .iter()
            .position(|other| is_abbreviation(word, other) || is_abbreviation(other, word));
        if let Some(pos) = pair {
            rest_b.swap_remove(pos);
            prefixed += 1;
        }
    }

    let matched = exact + prefixed;
    matched as f64 / (a.len() + b.len() - matched) as f64
}

/// Similarity used for titles: the better of [`text_similarity`] and
/// [`abbreviation_jaccard`].
pub fn title_similarity(a: &str, b: &str) -> f64 {
    text_similarity(a, b).max(abbreviation_jaccard(a, b))
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Canonical form of a URL for duplicate detection.
///
/// Lower-cases the whole URL, drops the fragment, removes tracking query
/// parameters and trailing slashes on the path. A query separator present in
/// the input is preserved even when every parameter was stripped.
pub fn normalize_url(url: &str) -> String {
    let lowered = url.trim().to_lowercase();
    let without_fragment = lowered.split('#').next().unwrap_or_default();

    match without_fragment.split_once('?') {
        None => without_fragment.trim_end_matches('/').to_string(),
        Some((base, query)) => {
            let kept: Vec<&str> = query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .filter(|pair| {
                    let key = pair.split('=').next().unwrap_or_default();
                    !is_tracking_param(key)
                })
                .collect();
            format!("{}?{}", base.trim_end_matches('/'), kept.join("&"))
        }
    }
}

/// Key under which two URLs count as the same page: the normalised form
/// without an empty query separator.
pub fn url_identity(url: &str) -> String {
    let mut normalized = normalize_url(url);
    if normalized.ends_with('?') {
        normalized.pop();
    }
    normalized
}

/// Similarity of two already-normalised URLs.
///
/// Exact match scores 1.0, same host and path 0.8, same host 0.5. An empty
/// query (`page?`) matches the bare URL.
pub fn url_similarity(a: &str, b: &str) -> f64 {
    let a = a.strip_suffix('?').unwrap_or(a);
    let b = b.strip_suffix('?').unwrap_or(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (Ok(url_a), Ok(url_b)) = (Url::parse(a), Url::parse(b)) else {
        return 0.0;
    };

    let same_host = match (url_a.host_str(), url_b.host_str()) {
        (Some(ha), Some(hb)) => ha.eq_ignore_ascii_case(hb),
        _ => false,
    };
    if !same_host {
        return 0.0;
    }

    let path_a = url_a.path().trim_end_matches('/');
    let path_b = url_b.path().trim_end_matches('/');
    if path_a == path_b {
        0.8
    } else {
        0.5
    }
}
