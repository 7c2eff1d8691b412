//! GEMM-backed linear-algebra kernels.
//!
//! Everything the engine does to a matrix funnels through this module:
//!
//! - [`product`] / [`matmul`]: `result = alpha * (A · B) + beta * result`,
//!   with transposition expressed through view strides
//! - [`product_concurrent`]: the same product partitioned by output row
//!   ranges across a persistent [`WorkerPool`]
//! - [`hadamard`] / [`axpy`] / [`col_mean`]: the elementwise and reduction
//!   kernels used by backpropagation
//!
//! Stride selection happens in exactly one place (`gemm_f32`), so transposed
//! operands cost nothing beyond a different stride pair. The default backend
//! is a safe triple loop; the `matrixmultiply` feature swaps in a packed
//! sgemm with identical stride semantics.

use rayon::prelude::*;

use crate::matrix::{Matrix, MatrixView};
use crate::pool::WorkerPool;
use crate::{Error, Result};

/// The one stride-aware GEMM kernel: `c = alpha * a·b + beta * c` where `a`
/// is `m x k`, `b` is `k x n`, `c` is `m x n`, each with explicit
/// (row, col) strides.
#[allow(clippy::too_many_arguments)]
#[inline]
fn gemm_f32(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    rsa: usize,
    csa: usize,
    b: &[f32],
    rsb: usize,
    csb: usize,
    beta: f32,
    c: &mut [f32],
    rsc: usize,
    csc: usize,
) {
    #[cfg(feature = "matrixmultiply")]
    unsafe {
        matrixmultiply::sgemm(
            m,
            k,
            n,
            alpha,
            a.as_ptr(),
            rsa as isize,
            csa as isize,
            b.as_ptr(),
            rsb as isize,
            csb as isize,
            beta,
            c.as_mut_ptr(),
            rsc as isize,
            csc as isize,
        );
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        let a_row = i * rsa;
        let c_row = i * rsc;
        for j in 0..n {
            let b_col = j * csb;
            let mut acc = 0.0_f32;
            for p in 0..k {
                acc = a[a_row + p * csa].mul_add(b[p * rsb + b_col], acc);
            }
            let idx = c_row + j * csc;
            c[idx] = alpha * acc + beta * c[idx];
        }
    }
}

fn check_product_shapes(a: &MatrixView<'_>, b: &MatrixView<'_>, out: &Matrix) -> Result<()> {
    if a.cols() != b.rows() {
        return Err(Error::ShapeMismatch(format!(
            "cannot multiply {}x{} by {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols()
        )));
    }
    if out.rows() != a.rows() || out.cols() != b.cols() {
        return Err(Error::ShapeMismatch(format!(
            "product of {}x{} and {}x{} does not fit a {}x{} result",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols(),
            out.rows(),
            out.cols()
        )));
    }
    Ok(())
}

/// `out = alpha * (a · b) + beta * out`.
///
/// Transposed operands are passed as transposed views ([`Matrix::t`]); the
/// kernel honors their strides directly, so no data is ever copied.
pub fn product(
    a: MatrixView<'_>,
    b: MatrixView<'_>,
    out: &mut Matrix,
    alpha: f32,
    beta: f32,
) -> Result<()> {
    check_product_shapes(&a, &b, out)?;
    if out.is_empty() {
        return Ok(());
    }
    if a.cols() == 0 {
        // Degenerate inner dimension: the product is all zeros, so only the
        // beta term survives.
        for v in out.data_mut() {
            *v *= beta;
        }
        return Ok(());
    }

    let (rsa, csa) = a.strides();
    let (rsb, csb) = b.strides();
    let (m, n, k) = (a.rows(), b.cols(), a.cols());
    let out_cols = out.cols();
    gemm_f32(
        m,
        n,
        k,
        alpha,
        a.data(),
        rsa,
        csa,
        b.data(),
        rsb,
        csb,
        beta,
        out.data_mut(),
        out_cols,
        1,
    );
    Ok(())
}

/// Allocate and return `a · b`.
pub fn matmul(a: MatrixView<'_>, b: MatrixView<'_>) -> Result<Matrix> {
    let mut out = Matrix::zeros(a.rows(), b.cols());
    product(a, b, &mut out, 1.0, 0.0)?;
    Ok(out)
}

/// [`product`] with the output rows partitioned across `pool`'s workers.
///
/// Rows of `a` are split into `ceil(rows / threads)`-sized contiguous ranges;
/// each worker writes only its own output-row range, so the result matches
/// the sequential path without any synchronization beyond the final join.
/// Falls back to the sequential kernel when the pool has a single thread.
pub fn product_concurrent(
    pool: &WorkerPool,
    a: MatrixView<'_>,
    b: MatrixView<'_>,
    out: &mut Matrix,
    alpha: f32,
    beta: f32,
) -> Result<()> {
    let threads = pool.threads();
    if threads == 1 || a.rows() <= 1 || out.is_empty() || a.cols() == 0 {
        return product(a, b, out, alpha, beta);
    }
    check_product_shapes(&a, &b, out)?;

    let rows_per_range = a.rows().div_ceil(threads);
    let (rsa, csa) = a.strides();
    let (rsb, csb) = b.strides();
    let (n, k) = (b.cols(), a.cols());
    let a_data = a.data();
    let b_data = b.data();
    let out_cols = out.cols();

    pool.install(|| {
        out.data_mut()
            .par_chunks_mut(rows_per_range * out_cols)
            .enumerate()
            .for_each(|(range, c)| {
                let row0 = range * rows_per_range;
                let m = c.len() / out_cols;
                gemm_f32(
                    m,
                    n,
                    k,
                    alpha,
                    &a_data[row0 * rsa..],
                    rsa,
                    csa,
                    b_data,
                    rsb,
                    csb,
                    beta,
                    c,
                    out_cols,
                    1,
                );
            });
    });
    Ok(())
}

/// Elementwise (Hadamard) product: `out[i] = alpha * x[i] * y[i] + beta * out[i]`.
///
/// Shape contract (asserted): all three slices have equal length.
#[inline]
pub fn hadamard(x: &[f32], y: &[f32], out: &mut [f32], alpha: f32, beta: f32) {
    assert_eq!(
        x.len(),
        y.len(),
        "hadamard operands differ in length: {} vs {}",
        x.len(),
        y.len()
    );
    assert_eq!(
        x.len(),
        out.len(),
        "hadamard result length {} does not match operand length {}",
        out.len(),
        x.len()
    );

    for i in 0..out.len() {
        out[i] = (alpha * x[i]).mul_add(y[i], beta * out[i]);
    }
}

/// Scaled accumulate: `y[i] += alpha * x[i]`.
///
/// Shape contract (asserted): `x.len() == y.len()`.
#[inline]
pub fn axpy(x: &[f32], y: &mut [f32], alpha: f32) {
    assert_eq!(
        x.len(),
        y.len(),
        "axpy operands differ in length: {} vs {}",
        x.len(),
        y.len()
    );

    for (yv, &xv) in y.iter_mut().zip(x) {
        *yv = alpha.mul_add(xv, *yv);
    }
}

/// Column means of a batch matrix: `out[j] = mean_i m[i, j]`.
///
/// Shape contract (asserted): `out.len() == m.cols()`.
pub fn col_mean(m: MatrixView<'_>, out: &mut [f32]) {
    assert_eq!(
        out.len(),
        m.cols(),
        "col_mean output length {} does not match column count {}",
        out.len(),
        m.cols()
    );

    out.fill(0.0);
    if m.rows() == 0 {
        return;
    }
    for i in 0..m.rows() {
        for (j, o) in out.iter_mut().enumerate() {
            *o += m.get(i, j);
        }
    }
    let inv = 1.0 / m.rows() as f32;
    for o in out.iter_mut() {
        *o *= inv;
    }
}
