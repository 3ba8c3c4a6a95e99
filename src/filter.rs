//! Low-complexity scoring of bubble path pairs.

use crate::graph::base_code;

/// Repetitiveness score of two equal-length nucleotide paths.
///
/// For each path, overlapping 2-mers and 3-mers are tallied and each table
/// cell contributes c*(c-1); the score is the sum over both paths. A path
/// dominated by few distinct words scores high, a diverse path scores near
/// zero. Both paths go through the identical tally; the result does not
/// depend on their order.
pub fn low_complexity_score(path1: &[u8], path2: &[u8]) -> u64 {
    debug_assert_eq!(path1.len(), path2.len());
    word_dispersion(path1) + word_dispersion(path2)
}

fn word_dispersion(path: &[u8]) -> u64 {
    let mut counts2 = [0u64; 16];
    let mut counts3 = [0u64; 64];

    let codes: Vec<u8> = path.iter().filter_map(|&b| base_code(b)).collect();

    for w in codes.windows(2) {
        counts2[(w[0] as usize) << 2 | w[1] as usize] += 1;
    }
    for w in codes.windows(3) {
        counts3[(w[0] as usize) << 4 | (w[1] as usize) << 2 | w[2] as usize] += 1;
    }

    let disp = |counts: &[u64]| counts.iter().map(|&c| c * (c.saturating_sub(1))).sum::<u64>();
    disp(&counts2) + disp(&counts3)
}
