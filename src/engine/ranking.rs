// src/engine/ranking.rs

use serde::Serialize;

use crate::engine::scoring::round2;

/// Rank and percentile of one graded attempt within its test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Standing {
    pub rank: i32,
    /// `None` when nobody has been graded yet.
    pub percentile: Option<f64>,
}

/// `rank = 1 + better`; `percentile = (total - rank + 1) / total * 100`.
///
/// Ties share a rank, so equal marks give equal standing.
pub fn standing(better: i64, total: i64) -> Standing {
    let rank = (better + 1) as i32;
    let percentile = if total > 0 {
        Some(round2((total - better) as f64 / total as f64 * 100.0))
    } else {
        None
    };
    Standing { rank, percentile }
}

/// Competition ranks ("1224") for marks sorted best-first.
pub fn competition_ranks(sorted_desc: &[f64]) -> Vec<i32> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    for (i, marks) in sorted_desc.iter().enumerate() {
        if i > 0 && sorted_desc[i - 1] == *marks {
            let prev = ranks[i - 1];
            ranks.push(prev);
        } else {
            ranks.push(i as i32 + 1);
        }
    }
    ranks
}
