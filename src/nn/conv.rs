//! Conv1d/Conv2d layers: thin [`Module`] wrappers around the expression
//! graph's `conv1d`/`conv2d` ternary ops, which dispatch to the
//! `im2col`+gemm kernels in [`crate::conv`].

use serde::{Deserialize, Serialize};

use super::module::Module;
use super::Layer;
use crate::expr::ExprNode;
use crate::init;
use crate::shape::Shape;
use crate::variable::Variable;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Conv1dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
}

/// 1-D convolution: kernel `[out_channels, in_channels, kernel_size]`,
/// bias `[out_channels]`.
pub struct Conv1d {
    pub kernel: Variable,
    pub bias: Variable,
    pub stride: usize,
}

impl Conv1d {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize, stride: usize) -> Self {
        Conv1d {
            kernel: Variable::trainable(Shape::new(vec![out_channels, in_channels, kernel_size]).unwrap()),
            bias: Variable::trainable(Shape::new(vec![out_channels]).unwrap()),
            stride,
        }
    }

    pub fn from_config(config: Conv1dConfig) -> Self {
        Self::new(config.in_channels, config.out_channels, config.kernel_size, config.stride)
    }

    pub fn init_he(&mut self) {
        init::he_init(&self.kernel);
    }
}

impl Module for Conv1d {
    fn parameters(&self) -> Vec<&Variable> {
        vec![&self.kernel, &self.bias]
    }

    fn forward(&self, input: ExprNode) -> ExprNode {
        ExprNode::conv1d(
            ExprNode::leaf(self.kernel.clone()),
            input,
            ExprNode::leaf(self.bias.clone()),
            self.stride,
        )
    }
}

impl Layer for Conv1d {}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kh: usize,
    pub kw: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
}

/// 2-D convolution: kernel `[out_channels, in_channels, kh, kw]`, bias
/// `[out_channels]`.
pub struct Conv2d {
    pub kernel: Variable,
    pub bias: Variable,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
}

impl Conv2d {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kh: usize,
        kw: usize,
        stride_h: usize,
        stride_w: usize,
        pad_h: usize,
        pad_w: usize,
    ) -> Self {
        Conv2d {
            kernel: Variable::trainable(Shape::new(vec![out_channels, in_channels, kh, kw]).unwrap()),
            bias: Variable::trainable(Shape::new(vec![out_channels]).unwrap()),
            stride_h,
            stride_w,
            pad_h,
            pad_w,
        }
    }

    pub fn from_config(config: Conv2dConfig) -> Self {
        Self::new(
            config.in_channels,
            config.out_channels,
            config.kh,
            config.kw,
            config.stride_h,
            config.stride_w,
            config.pad_h,
            config.pad_w,
        )
    }

    pub fn init_he(&mut self) {
        init::he_init(&self.kernel);
    }
}

impl Module for Conv2d {
    fn parameters(&self) -> Vec<&Variable> {
        vec![&self.kernel, &self.bias]
    }

    fn forward(&self, input: ExprNode) -> ExprNode {
        ExprNode::conv2d(
            ExprNode::leaf(self.kernel.clone()),
            input,
            ExprNode::leaf(self.bias.clone()),
            self.stride_h,
            self.stride_w,
            self.pad_h,
            self.pad_w,
        )
    }
}

impl Layer for Conv2d {}
