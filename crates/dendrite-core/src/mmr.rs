//! Maximal marginal relevance selection.
//!
//! Shared reranking utility for vector stores that fetch a candidate pool
//! larger than the requested result size and pick a final subset trading
//! relevance against diversity.

/// Compute cosine similarity between two vectors.
///
/// Returns `0.0` when the vectors differ in length, are empty, or either
/// has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Greedy maximal-marginal-relevance selection.
///
/// Given a query embedding and a pool of candidate embeddings, returns the
/// indices of up to `k` candidates, in selection order. The first pick is
/// always the candidate most similar to the query; each following round
/// picks the remaining candidate maximizing
///
/// `lambda_mult * sim(candidate, query) - (1 - lambda_mult) * max_sim(candidate, selected)`
///
/// `lambda_mult = 1.0` degenerates to a pure similarity ranking and
/// `lambda_mult = 0.0` maximizes diversity among the selected results after
/// the first pick; values outside `[0, 1]` are accepted as-is. Ties go to the
/// lowest original index, so the output is deterministic for identical
/// inputs.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    lambda_mult: f32,
    k: usize,
) -> Vec<usize> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let sim_to_query: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine_similarity(query, candidate))
        .collect();

    let mut first = 0;
    for (i, &sim) in sim_to_query.iter().enumerate() {
        if sim > sim_to_query[first] {
            first = i;
        }
    }

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    selected.push(first);
    let mut remaining: Vec<usize> = (0..candidates.len()).filter(|&i| i != first).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &i) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&j| cosine_similarity(&candidates[i], &candidates[j]))
                .fold(f32::NEG_INFINITY, f32::max);

            let score = lambda_mult * sim_to_query[i] - (1.0 - lambda_mult) * redundancy;

            // Strict comparison keeps the earliest index on ties; `remaining`
            // stays in ascending original-index order.
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
