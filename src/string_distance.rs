//! String distances used to pair samples across datasets.

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Hamming distance where early mismatches cost more: position `i` weighs `(n - i) / n`.
pub fn prefix_weighted_hamming(a: &str, b: &str) -> f64 {
    weighted_hamming(a, b, |i, n| (n - i) as f64 / n as f64)
}

/// Hamming distance where late mismatches cost more: position `i` weighs `(i + 1) / n`.
pub fn suffix_weighted_hamming(a: &str, b: &str) -> f64 {
    weighted_hamming(a, b, |i, n| (i + 1) as f64 / n as f64)
}

fn weighted_hamming(a: &str, b: &str, weight: impl Fn(usize, usize) -> f64) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = a.len().max(b.len());
    (0..n)
        .filter(|&i| a.get(i) != b.get(i))
        .map(|i| weight(i, n))
        .sum()
}

/// Longest prefix shared by every string; `None` for an empty input.
pub fn common_prefix<'a, I>(strings: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut iter = strings.into_iter();
    let first: Vec<char> = iter.next()?.chars().collect();
    let mut len = first.len();
    for s in iter {
        len = first
            .iter()
            .zip(s.chars())
            .take(len)
            .take_while(|(x, y)| *x == y)
            .count();
        if len == 0 {
            break;
        }
    }
    Some(first[..len].iter().collect())
}

/// Longest suffix shared by every string; `None` for an empty input.
pub fn common_suffix<'a, I>(strings: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let reversed: Vec<String> = strings
        .into_iter()
        .map(|s| s.chars().rev().collect())
        .collect();
    common_prefix(reversed.iter().map(String::as_str)).map(|s| s.chars().rev().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }

    #[test]
    fn weighted_hamming_prefers_late_or_early_mismatches() {
        // GSM100 vs GSM102: mismatch at the last of six positions.
        let prefix = prefix_weighted_hamming("GSM100", "GSM102");
        assert!((prefix - 1.0 / 6.0).abs() < 1e-12);
        let suffix = suffix_weighted_hamming("GSM100", "GSM102");
        assert!((suffix - 1.0).abs() < 1e-12);
        // length difference counts as mismatches
        assert!((prefix_weighted_hamming("ab", "abcd") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn common_affixes() {
        let titles = ["experiment: a (control)", "experiment: b (control)"];
        assert_eq!(common_prefix(titles).as_deref(), Some("experiment: "));
        assert_eq!(common_suffix(titles).as_deref(), Some(" (control)"));
        assert_eq!(common_prefix(Vec::<&str>::new()), None);
    }
}
