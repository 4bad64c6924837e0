//! Strided single-precision GEMM for the dense layers.
//!
//! `c = alpha * a * b + beta * c` where every operand is addressed through a
//! row stride and a column stride, so transposes are expressed by swapping
//! strides instead of copying. The `matrixmultiply` feature swaps the plain
//! loop for a blocked kernel.

/// Strided view of a row-major or transposed operand.
#[derive(Debug, Clone, Copy)]
pub(crate) struct View<'a> {
    pub data: &'a [f32],
    pub rs: usize,
    pub cs: usize,
}

impl<'a> View<'a> {
    /// `data` as a row-major matrix with `cols` columns.
    #[inline]
    pub fn rows(data: &'a [f32], cols: usize) -> Self {
        Self {
            data,
            rs: cols,
            cs: 1,
        }
    }

    /// Transpose of the row-major matrix `data` with `cols` columns.
    #[inline]
    pub fn transposed(data: &'a [f32], cols: usize) -> Self {
        Self {
            data,
            rs: 1,
            cs: cols,
        }
    }
}

/// `c(m, n) = alpha * a(m, k) * b(k, n) + beta * c`, `c` row-major.
#[allow(clippy::too_many_arguments)]
#[inline]
pub(crate) fn gemm(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: View<'_>,
    b: View<'_>,
    beta: f32,
    c: &mut [f32],
) {
    if m == 0 || n == 0 {
        return;
    }
    debug_assert!(c.len() >= m * n);
    if k == 0 {
        for v in &mut c[..m * n] {
            *v *= beta;
        }
        return;
    }

    #[cfg(feature = "matrixmultiply")]
    {
        debug_assert!(a.data.len() > (m - 1) * a.rs + (k - 1) * a.cs);
        debug_assert!(b.data.len() > (k - 1) * b.rs + (n - 1) * b.cs);
        // SAFETY: the debug assertions above spell out the extents callers
        // guarantee; every index stays inside `a`, `b` and the first `m * n`
        // elements of `c`.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                alpha,
                a.data.as_ptr(),
                a.rs as isize,
                a.cs as isize,
                b.data.as_ptr(),
                b.rs as isize,
                b.cs as isize,
                beta,
                c.as_mut_ptr(),
                n as isize,
                1,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        let out = &mut c[i * n..(i + 1) * n];
        for (j, slot) in out.iter_mut().enumerate() {
            let mut acc = 0.0_f32;
            for p in 0..k {
                acc = a.data[i * a.rs + p * a.cs].mul_add(b.data[p * b.rs + j * b.cs], acc);
            }
            *slot = alpha * acc + beta * *slot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_transposed_products() {
        // a: 2x3, b: 3x2
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut c = [0.0; 4];
        gemm(2, 2, 3, 1.0, View::rows(&a, 3), View::rows(&b, 2), 0.0, &mut c);
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);

        // a * a^T
        let mut c = [1.0; 4];
        gemm(2, 2, 3, 1.0, View::rows(&a, 3), View::transposed(&a, 3), 1.0, &mut c);
        assert_eq!(c, [15.0, 33.0, 33.0, 78.0]);
    }
}
