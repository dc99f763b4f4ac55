//! 1-D and 2-D convolution via `im2col` + gemm, with the matching `col2im`
//! used by the backward pass. Only zero-padding is supported; stride may
//! differ per spatial axis.

use crate::gemm;
use crate::shape::Shape;
use crate::tensor::{Float, Tensor};

/// `kernel[Oc,Ic,K] , bias[Oc]  ->  [Oc, 1 + Ic*K]`. Column 0 is the bias;
/// columns `1 + k + ic*K` hold the flattened kernel.
pub fn kernel_im2col_1d(kernel: &Tensor, bias: &Tensor, oc: usize, ic: usize, k: usize) -> Vec<Float> {
    let cols = 1 + ic * k;
    let mut out = vec![0.0; oc * cols];
    for o in 0..oc {
        out[o * cols] = bias.index_flat(o).unwrap();
        for c in 0..ic {
            for kk in 0..k {
                out[o * cols + 1 + kk + c * k] = kernel.index(&[o, c, kk]).unwrap();
            }
        }
    }
    out
}

/// `input[B,Ic,Feat] -> [B*effW, Ic*K + 1]`, column 0 fixed at `1.0`
/// (absorbs the bias into the gemm).
pub fn x_im2col_1d(
    input: &Tensor,
    b: usize,
    ic: usize,
    feat: usize,
    k: usize,
    stride: usize,
    eff_w: usize,
) -> Vec<Float> {
    let cols = 1 + ic * k;
    let mut out = vec![0.0; b * eff_w * cols];
    for bi in 0..b {
        for w in 0..eff_w {
            let row = bi * eff_w + w;
            out[row * cols] = 1.0;
            for c in 0..ic {
                for kk in 0..k {
                    out[row * cols + 1 + kk + c * k] = input.index(&[bi, c, kk + w * stride]).unwrap();
                }
            }
        }
    }
    out
}

/// Forward 1-D convolution: `kernel[Oc,Ic,K]`, `input[B,Ic,Feat]`, `bias[Oc]`.
pub fn conv1d_forward(
    kernel: &Tensor,
    input: &Tensor,
    bias: &Tensor,
    stride: usize,
) -> Tensor {
    let (oc, ic, k) = (kernel.shape().dims()[0], kernel.shape().dims()[1], kernel.shape().dims()[2]);
    let (b, feat) = (input.shape().dims()[0], input.shape().dims()[2]);
    let eff_w = (feat - k) / stride + 1;

    let k_cols = kernel_im2col_1d(kernel, bias, oc, ic, k);
    let x_cols = x_im2col_1d(input, b, ic, feat, k, stride, eff_w);

    let cols = 1 + ic * k;
    let mut res = vec![0.0; b * eff_w * oc];
    gemm::matmul(&x_cols, &k_cols, &mut res, b * eff_w, cols, oc, cols, false, true);

    // res_col2im: res[B*effW,Oc] (row bi*effW+w, col o) -> out[B,Oc,effW].
    let out = Tensor::zeros(Shape::new(vec![b, oc, eff_w]).unwrap());
    for bi in 0..b {
        for w in 0..eff_w {
            for o in 0..oc {
                out.set_index(&[bi, o, w], res[(bi * eff_w + w) * oc + o]).unwrap();
            }
        }
    }
    out.wrap_for_broadcasting();
    out
}

/// Backward 1-D convolution. Returns `(grad_kernel, grad_input, grad_bias)`.
pub fn conv1d_backward(
    kernel: &Tensor,
    input: &Tensor,
    bias: &Tensor,
    grad_out: &Tensor,
    stride: usize,
) -> (Tensor, Tensor, Tensor) {
    let (oc, ic, k) = (kernel.shape().dims()[0], kernel.shape().dims()[1], kernel.shape().dims()[2]);
    let (b, feat) = (input.shape().dims()[0], input.shape().dims()[2]);
    let eff_w = (feat - k) / stride + 1;
    let cols = 1 + ic * k;

    let k_cols = kernel_im2col_1d(kernel, bias, oc, ic, k);
    let x_cols = x_im2col_1d(input, b, ic, feat, k, stride, eff_w);

    // res_im2col: grad_out[B,Oc,effW] -> [B*effW, Oc] is a direct reshape
    // (identical memory layout since Oc is already the innermost stride).
    let mut grad_res = vec![0.0; b * eff_w * oc];
    for bi in 0..b {
        for o in 0..oc {
            for w in 0..eff_w {
                grad_res[(bi * eff_w + w) * oc + o] = grad_out.index(&[bi, o, w]).unwrap();
            }
        }
    }

    // grad on kernel-im2col: [Oc, cols] = grad_res^T[Oc,B*effW] * x_cols[B*effW,cols]
    let mut grad_k_cols = vec![0.0; oc * cols];
    gemm::matmul(&grad_res, &x_cols, &mut grad_k_cols, b * eff_w, oc, b * eff_w, cols, true, false);

    // grad on x-im2col: [B*effW, cols] = grad_res[B*effW,Oc] * k_cols[Oc,cols]
    let mut grad_x_cols = vec![0.0; b * eff_w * cols];
    gemm::matmul(&grad_res, &k_cols, &mut grad_x_cols, b * eff_w, oc, oc, cols, false, false);

    // kernel_col2im: one-to-one, no accumulation.
    let grad_kernel = Tensor::zeros(Shape::new(vec![oc, ic, k]).unwrap());
    let grad_bias = Tensor::zeros(Shape::new(vec![oc]).unwrap());
    for o in 0..oc {
        grad_bias.set_index(&[o], grad_k_cols[o * cols]).unwrap();
        for c in 0..ic {
            for kk in 0..k {
                grad_kernel
                    .set_index(&[o, c, kk], grad_k_cols[o * cols + 1 + kk + c * k])
                    .unwrap();
            }
        }
    }
    grad_kernel.wrap_for_broadcasting();
    grad_bias.wrap_for_broadcasting();

    // x_col2im: zero-init then accumulate over overlapping windows.
    let grad_input = Tensor::zeros(Shape::new(vec![b, ic, feat]).unwrap());
    for bi in 0..b {
        for w in 0..eff_w {
            let row = bi * eff_w + w;
            for c in 0..ic {
                for kk in 0..k {
                    let idx = [bi, c, kk + w * stride];
                    let prev = grad_input.index(&idx).unwrap();
                    grad_input
                        .set_index(&idx, prev + grad_x_cols[row * cols + 1 + kk + c * k])
                        .unwrap();
                }
            }
        }
    }
    grad_input.wrap_for_broadcasting();

    (grad_kernel, grad_input, grad_bias)
}

/// `kernel[Oc,Ic,Kh,Kw], bias[Oc] -> [Oc, 1 + Ic*Kh*Kw]`.
fn kernel_im2col_2d(kernel: &Tensor, bias: &Tensor, oc: usize, ic: usize, kh: usize, kw: usize) -> Vec<Float> {
    let ksize = kh * kw;
    let cols = 1 + ic * ksize;
    let mut out = vec![0.0; oc * cols];
    for o in 0..oc {
        out[o * cols] = bias.index_flat(o).unwrap();
        for c in 0..ic {
            for khh in 0..kh {
                for kww in 0..kw {
                    out[o * cols + 1 + c * ksize + khh * kw + kww] =
                        kernel.index(&[o, c, khh, kww]).unwrap();
                }
            }
        }
    }
    out
}

/// Zero-pad `input[B,Ic,H,W]` by `(ph, pw)` on each spatial axis.
fn pad2d(input: &Tensor, b: usize, ic: usize, h: usize, w: usize, ph: usize, pw: usize) -> Tensor {
    let ph2 = h + 2 * ph;
    let pw2 = w + 2 * pw;
    let padded = Tensor::zeros(Shape::new(vec![b, ic, ph2, pw2]).unwrap());
    for bi in 0..b {
        for c in 0..ic {
            for i in 0..h {
                for j in 0..w {
                    let v = input.index(&[bi, c, i, j]).unwrap();
                    padded.set_index(&[bi, c, i + ph, j + pw], v).unwrap();
                }
            }
        }
    }
    padded.wrap_for_broadcasting();
    padded
}

fn x_im2col_2d(
    padded: &Tensor,
    b: usize,
    ic: usize,
    kh: usize,
    kw: usize,
    stride_h: usize,
    stride_w: usize,
    eff_h: usize,
    eff_w: usize,
) -> Vec<Float> {
    let ksize = kh * kw;
    let cols = 1 + ic * ksize;
    let mut out = vec![0.0; b * eff_h * eff_w * cols];
    for bi in 0..b {
        for eh in 0..eff_h {
            for ew in 0..eff_w {
                let row = bi * eff_h * eff_w + eh * eff_w + ew;
                out[row * cols] = 1.0;
                for c in 0..ic {
                    for khh in 0..kh {
                        for kww in 0..kw {
                            let v = padded
                                .index(&[bi, c, eh * stride_h + khh, ew * stride_w + kww])
                                .unwrap();
                            out[row * cols + 1 + c * ksize + khh * kw + kww] = v;
                        }
                    }
                }
            }
        }
    }
    out
}

/// Forward 2-D convolution: `kernel[Oc,Ic,Kh,Kw]`, `input[B,Ic,H,W]`, `bias[Oc]`.
pub fn conv2d_forward(
    kernel: &Tensor,
    input: &Tensor,
    bias: &Tensor,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
) -> Tensor {
    let dims = kernel.shape().dims();
    let (oc, ic, kh, kw) = (dims[0], dims[1], dims[2], dims[3]);
    let idims = input.shape().dims();
    let (b, h, w) = (idims[0], idims[2], idims[3]);

    assert!(w + 2 * pad_w >= kw, "input width too small for kernel + padding");
    assert!(h + 2 * pad_h >= kh, "input height too small for kernel + padding");

    let eff_h = (h - kh + 2 * pad_h) / stride_h + 1;
    let eff_w = (w - kw + 2 * pad_w) / stride_w + 1;

    let k_cols = kernel_im2col_2d(kernel, bias, oc, ic, kh, kw);
    let padded = pad2d(input, b, ic, h, w, pad_h, pad_w);
    let x_cols = x_im2col_2d(&padded, b, ic, kh, kw, stride_h, stride_w, eff_h, eff_w);

    let cols = 1 + ic * kh * kw;
    let rows = b * eff_h * eff_w;
    let mut res = vec![0.0; rows * oc];
    gemm::matmul(&x_cols, &k_cols, &mut res, rows, cols, oc, cols, false, true);

    // res_col2im: res[B*effH*effW,Oc] (row bi*effH*effW+eh*effW+ew, col o) -> out[B,Oc,effH,effW].
    let out = Tensor::zeros(Shape::new(vec![b, oc, eff_h, eff_w]).unwrap());
    for bi in 0..b {
        for eh in 0..eff_h {
            for ew in 0..eff_w {
                let row = bi * eff_h * eff_w + eh * eff_w + ew;
                for o in 0..oc {
                    out.set_index(&[bi, o, eh, ew], res[row * oc + o]).unwrap();
                }
            }
        }
    }
    out.wrap_for_broadcasting();
    out
}

/// Backward 2-D convolution. Returns `(grad_kernel, grad_input, grad_bias)`.
pub fn conv2d_backward(
    kernel: &Tensor,
    input: &Tensor,
    bias: &Tensor,
    grad_out: &Tensor,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
) -> (Tensor, Tensor, Tensor) {
    let dims = kernel.shape().dims();
    let (oc, ic, kh, kw) = (dims[0], dims[1], dims[2], dims[3]);
    let idims = input.shape().dims();
    let (b, h, w) = (idims[0], idims[2], idims[3]);
    let eff_h = (h - kh + 2 * pad_h) / stride_h + 1;
    let eff_w = (w - kw + 2 * pad_w) / stride_w + 1;
    let ksize = kh * kw;
    let cols = 1 + ic * ksize;
    let rows = b * eff_h * eff_w;

    let k_cols = kernel_im2col_2d(kernel, bias, oc, ic, kh, kw);
    let padded = pad2d(input, b, ic, h, w, pad_h, pad_w);
    let x_cols = x_im2col_2d(&padded, b, ic, kh, kw, stride_h, stride_w, eff_h, eff_w);

    let mut grad_res = vec![0.0; rows * oc];
    for bi in 0..b {
        for o in 0..oc {
            for eh in 0..eff_h {
                for ew in 0..eff_w {
                    grad_res[(bi * eff_h * eff_w + eh * eff_w + ew) * oc + o] =
                        grad_out.index(&[bi, o, eh, ew]).unwrap();
                }
            }
        }
    }

    let mut grad_k_cols = vec![0.0; oc * cols];
    gemm::matmul(&grad_res, &x_cols, &mut grad_k_cols, rows, oc, rows, cols, true, false);

    let mut grad_x_cols = vec![0.0; rows * cols];
    gemm::matmul(&grad_res, &k_cols, &mut grad_x_cols, rows, oc, oc, cols, false, false);

    let grad_kernel = Tensor::zeros(Shape::new(vec![oc, ic, kh, kw]).unwrap());
    let grad_bias = Tensor::zeros(Shape::new(vec![oc]).unwrap());
    for o in 0..oc {
        grad_bias.set_index(&[o], grad_k_cols[o * cols]).unwrap();
        for c in 0..ic {
            for khh in 0..kh {
                for kww in 0..kw {
                    grad_kernel
                        .set_index(&[o, c, khh, kww], grad_k_cols[o * cols + 1 + c * ksize + khh * kw + kww])
                        .unwrap();
                }
            }
        }
    }
    grad_kernel.wrap_for_broadcasting();
    grad_bias.wrap_for_broadcasting();

    // Accumulate into the padded gradient buffer, then crop back.
    let padded_h = h + 2 * pad_h;
    let padded_w = w + 2 * pad_w;
    let grad_padded = Tensor::zeros(Shape::new(vec![b, ic, padded_h, padded_w]).unwrap());
    for bi in 0..b {
        for eh in 0..eff_h {
            for ew in 0..eff_w {
                let row = bi * eff_h * eff_w + eh * eff_w + ew;
                for c in 0..ic {
                    for khh in 0..kh {
                        for kww in 0..kw {
                            let idx = [bi, c, eh * stride_h + khh, ew * stride_w + kww];
                            let prev = grad_padded.index(&idx).unwrap();
                            grad_padded
                                .set_index(&idx, prev + grad_x_cols[row * cols + 1 + c * ksize + khh * kw + kww])
                                .unwrap();
                        }
                    }
                }
            }
        }
    }
    grad_padded.wrap_for_broadcasting();

    let grad_input = Tensor::zeros(Shape::new(vec![b, ic, h, w]).unwrap());
    for bi in 0..b {
        for c in 0..ic {
            for i in 0..h {
                for j in 0..w {
                    let v = grad_padded.index(&[bi, c, i + pad_h, j + pad_w]).unwrap();
                    grad_input.set_index(&[bi, c, i, j], v).unwrap();
                }
            }
        }
    }
    grad_input.wrap_for_broadcasting();

    (grad_kernel, grad_input, grad_bias)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv1d_matches_scenario() {
        let kernel = Tensor::from_vec(Shape::new(vec![1, 1, 2]).unwrap(), vec![1.0, -1.0]).unwrap();
        let input = Tensor::from_vec(Shape::new(vec![1, 1, 4]).unwrap(), vec![1.0, 2.0, 4.0, 7.0]).unwrap();
        let bias = Tensor::zeros(Shape::new(vec![1]).unwrap());
        let out = conv1d_forward(&kernel, &input, &bias, 1);
        assert_eq!(out.shape().dims(), &[1, 1, 3]);
        assert_eq!(out.index(&[0, 0, 0]).unwrap(), -1.0);
        assert_eq!(out.index(&[0, 0, 1]).unwrap(), -2.0);
        assert_eq!(out.index(&[0, 0, 2]).unwrap(), -3.0);
    }

    #[test]
    fn conv1d_forward_keeps_channels_separate_for_multiple_out_channels() {
        // Two output channels sharing one input channel: channel 0 sums the
        // window, channel 1 differences it. If the col2im permutation were
        // skipped (a bare reshape), the two channels' values would be
        // interleaved across the width axis instead of kept apart.
        let kernel =
            Tensor::from_vec(Shape::new(vec![2, 1, 2]).unwrap(), vec![1.0, 1.0, 1.0, -1.0]).unwrap();
        let input = Tensor::from_vec(Shape::new(vec![1, 1, 4]).unwrap(), vec![1.0, 2.0, 4.0, 7.0]).unwrap();
        let bias = Tensor::zeros(Shape::new(vec![2]).unwrap());
        let out = conv1d_forward(&kernel, &input, &bias, 1);
        assert_eq!(out.shape().dims(), &[1, 2, 3]);
        assert_eq!(out.index(&[0, 0, 0]).unwrap(), 3.0);
        assert_eq!(out.index(&[0, 0, 1]).unwrap(), 6.0);
        assert_eq!(out.index(&[0, 0, 2]).unwrap(), 11.0);
        assert_eq!(out.index(&[0, 1, 0]).unwrap(), -1.0);
        assert_eq!(out.index(&[0, 1, 1]).unwrap(), -2.0);
        assert_eq!(out.index(&[0, 1, 2]).unwrap(), -3.0);
    }

    #[test]
    fn conv1d_backward_accumulates_overlaps() {
        let kernel = Tensor::from_vec(Shape::new(vec![1, 1, 2]).unwrap(), vec![1.0, 1.0]).unwrap();
        let input = Tensor::from_vec(Shape::new(vec![1, 1, 3]).unwrap(), vec![1.0, 1.0, 1.0]).unwrap();
        let bias = Tensor::zeros(Shape::new(vec![1]).unwrap());
        let grad_out = Tensor::from_vec(Shape::new(vec![1, 1, 2]).unwrap(), vec![1.0, 1.0]).unwrap();
        let (_gk, gx, _gb) = conv1d_backward(&kernel, &input, &bias, &grad_out, 1);
        // middle input element participates in both output windows.
        assert_eq!(gx.index(&[0, 0, 1]).unwrap(), 2.0);
    }

    #[test]
    fn conv2d_output_shape() {
        let kernel = Tensor::zeros(Shape::new(vec![2, 1, 3, 3]).unwrap());
        let input = Tensor::zeros(Shape::new(vec![1, 1, 5, 5]).unwrap());
        let bias = Tensor::zeros(Shape::new(vec![2]).unwrap());
        let out = conv2d_forward(&kernel, &input, &bias, 1, 1, 1, 1);
        assert_eq!(out.shape().dims(), &[1, 2, 5, 5]);
    }
}
