//! Circular pattern matching for sector-index alignment.
//!
//! After boot the running sector index is an arbitrary rotation of the
//! ring the LUT was learned on. Alignment recovers the phase: each
//! recorded lap is normalized by its mean and compared against the
//! pattern under every circular shift; the shift minimizing the mean
//! per-sector L1 distance wins the lap, and the offset is chosen by
//! plurality vote across laps.

use rover_common::consts::PPR_LIMIT;

/// A lap's best-matching shift and its score (mean per-sector L1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LapMatch {
    pub shift: u16,
    pub score: f32,
}

/// Normalize a lap row by its mean. `None` when the row sum is not
/// positive (stalled or empty lap — nothing to match against).
pub fn normalize_lap(row: &[f32]) -> Option<[f32; PPR_LIMIT]> {
    let n = row.len();
    if n == 0 {
        return None;
    }
    let sum: f32 = row.iter().sum();
    if sum <= 0.0 {
        return None;
    }
    let mean = sum / n as f32;
    let mut out = [0.0f32; PPR_LIMIT];
    for (o, v) in out.iter_mut().zip(row) {
        *o = v / mean;
    }
    Some(out)
}

/// Exhaustive circular shift search of one normalized lap against the
/// pattern.
///
/// A shift of `s` scores the hypothesis that running sector `k`
/// corresponds to pattern entry `(k + s) mod n` — the same convention the
/// corrected-period lookup uses. Ties resolve to the smaller shift.
pub fn best_shift(lap_norm: &[f32], pattern: &[f32]) -> LapMatch {
    let n = pattern.len();
    debug_assert!(n > 0 && lap_norm.len() >= n);

    let mut best = LapMatch {
        shift: 0,
        score: f32::INFINITY,
    };
    for shift in 0..n {
        let mut dist = 0.0f32;
        for k in 0..n {
            dist += (lap_norm[k] - pattern[(k + shift) % n]).abs();
        }
        let score = dist / n as f32;
        if score < best.score {
            best = LapMatch {
                shift: shift as u16,
                score,
            };
        }
    }
    best
}

/// Choose the offset from per-lap matches: plurality vote, with ties and
/// degenerate cases falling back to the single best-scoring lap.
pub fn vote(matches: &[LapMatch]) -> Option<LapMatch> {
    if matches.is_empty() {
        return None;
    }

    let mut votes = [0u8; PPR_LIMIT];
    for m in matches {
        votes[m.shift as usize % PPR_LIMIT] += 1;
    }
    let top = *votes.iter().max().unwrap();
    let winners = votes.iter().filter(|v| **v == top).count();

    let best_single = matches
        .iter()
        .copied()
        .min_by(|a, b| a.score.total_cmp(&b.score))
        .unwrap();

    if winners > 1 {
        // Tie: trust the single cleanest lap.
        return Some(best_single);
    }
    let winner = votes.iter().position(|v| *v == top).unwrap() as u16;
    let score = matches
        .iter()
        .filter(|m| m.shift == winner)
        .map(|m| m.score)
        .fold(f32::INFINITY, f32::min);
    Some(LapMatch {
        shift: winner,
        score,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────
