//! Cosine similarity over f32 slices.
//!
//! Products are accumulated into [`LANES`] independent partial sums, one
//! per position within each block of `LANES` elements. The lane array is
//! laid out so the compiler can keep it in one SIMD register, but the
//! arithmetic is plain IEEE f32 in a fixed order: results are bitwise
//! identical whether or not the loop is vectorized.
//!
//! Reduction order, for reference:
//! 1. `lane[i % LANES] += a[i] * b[i]` for every `i` in the full blocks
//! 2. lanes summed left to right
//! 3. tail elements added left to right

/// Width of one accumulation block.
pub const LANES: usize = 8;

/// Dot product and both squared norms in a single pass.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sums {
    dot: f32,
    norm_a: f32,
    norm_b: f32,
}

fn blocked_sums(a: &[f32], b: &[f32]) -> Sums {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);

    let mut dot = [0.0f32; LANES];
    let mut norm_a = [0.0f32; LANES];
    let mut norm_b = [0.0f32; LANES];

    let blocks_a = a.chunks_exact(LANES);
    let blocks_b = b.chunks_exact(LANES);
    let (tail_a, tail_b) = (blocks_a.remainder(), blocks_b.remainder());

    for (xa, xb) in blocks_a.zip(blocks_b) {
        for lane in 0..LANES {
            dot[lane] += xa[lane] * xb[lane];
            norm_a[lane] += xa[lane] * xa[lane];
            norm_b[lane] += xb[lane] * xb[lane];
        }
    }

    let mut sums = Sums {
        dot: reduce(&dot),
        norm_a: reduce(&norm_a),
        norm_b: reduce(&norm_b),
    };
    for (x, y) in tail_a.iter().zip(tail_b) {
        sums.dot += x * y;
        sums.norm_a += x * x;
        sums.norm_b += y * y;
    }
    sums
}

fn reduce(lanes: &[f32; LANES]) -> f32 {
    lanes.iter().fold(0.0, |acc, v| acc + v)
}

/// Dot product of two equal-length vectors; 0 on length mismatch.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    blocked_sums(a, b).dot
}

/// `dot(a, b) / (|a| * |b|)`, clamped to [-1, 1].
///
/// Returns 0 when either vector has zero norm, when lengths differ, or
/// when the inputs contain non-finite values.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let sums = blocked_sums(a, b);
    if sums.norm_a == 0.0 || sums.norm_b == 0.0 {
        return 0.0;
    }

    let score = sums.dot / (sums.norm_a.sqrt() * sums.norm_b.sqrt());
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
