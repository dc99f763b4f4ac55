//! Row-major gemm with build-time transpose flags on either operand.
//! `alpha = 1`, `beta = 0` always (no accumulation into `out`) — the engine
//! never needs a fused multiply-accumulate gemm, only a fresh matmul result.

use crate::tensor::Float;

/// `out[M,N] = op(a)[M,K] * op(b)[K,N]`, where `op` transposes its operand
/// iff the corresponding flag is set. `a` is `(a_rows, a_cols)` *before*
/// any transpose; likewise `b`. Row-major storage throughout.
pub fn matmul(
    a: &[Float],
    b: &[Float],
    out: &mut [Float],
    a_rows: usize,
    a_cols: usize,
    b_rows: usize,
    b_cols: usize,
    transpose_a: bool,
    transpose_b: bool,
) {
    let (m, k) = if transpose_a { (a_cols, a_rows) } else { (a_rows, a_cols) };
    let (k2, n) = if transpose_b { (b_cols, b_rows) } else { (b_rows, b_cols) };
    assert_eq!(k, k2, "gemm inner dimension mismatch");
    assert_eq!(out.len(), m * n);

    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0;
            for p in 0..k {
                let a_val = if transpose_a { a[p * a_cols + i] } else { a[i * a_cols + p] };
                let b_val = if transpose_b { b[j * b_cols + p] } else { b[p * b_cols + j] };
                acc += a_val * b_val;
            }
            out[i * n + j] = acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_matmul() {
        let a = [1.0, 2.0, 3.0, 4.0]; // [2,2]
        let b = [1.0, 0.0, 0.0, 1.0]; // identity [2,2]
        let mut out = [0.0; 4];
        matmul(&a, &b, &mut out, 2, 2, 2, 2, false, false);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn transpose_left() {
        // x = [[1,2],[3,4]], y = identity; matmul(x^T, y) = [[1,3],[2,4]]
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [1.0, 0.0, 0.0, 1.0];
        let mut out = [0.0; 4];
        matmul(&x, &y, &mut out, 2, 2, 2, 2, true, false);
        assert_eq!(out, [1.0, 3.0, 2.0, 4.0]);
    }
}
