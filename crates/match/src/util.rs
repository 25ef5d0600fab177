use std::collections::HashSet;

/// Levenshtein edit distance using the two-row O(min(m,n)) space algorithm.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a = s1.as_bytes();
    let b = s2.as_bytes();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Keep the shorter string in the inner loop to minimise allocation.
    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Jaccard overlap of whitespace tokens, in [0.0, 1.0].
pub fn token_overlap(s1: &str, s2: &str) -> f32 {
    let a: HashSet<&str> = s1.split_whitespace().collect();
    let b: HashSet<&str> = s2.split_whitespace().collect();

    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f32 / union as f32
}

/// Text similarity for already-normalized strings: the better of token
/// overlap and character-level Levenshtein ratio. Token overlap forgives
/// reordered words, the edit ratio forgives ocr smudges inside a word.
pub fn similarity(s1: &str, s2: &str) -> f32 {
    if s1 == s2 {
        return 1.0;
    }
    let max_len = s1.len().max(s2.len());
    if max_len == 0 {
        return 1.0;
    }
    let edit_ratio = 1.0 - (levenshtein_distance(s1, s2) as f32 / max_len as f32);
    edit_ratio.max(token_overlap(s1, s2))
}
