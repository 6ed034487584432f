// 该文件是 Qianli （千里眼） 项目的一部分。
// src/preprocess.rs - 输入预处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use tracing::debug;

use crate::frame::{FrameError, InputTensor, PlanarBuffer, RGB_CHANNELS, RgbFrame, TensorShape};

const NORMALIZE_CENTER: f32 = 127.5;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("内存分配失败: {0}")]
  Allocation(std::collections::TryReserveError),
}

impl From<FrameError> for PreprocessError {
  fn from(err: FrameError) -> Self {
    match err {
      FrameError::Allocation(e) => PreprocessError::Allocation(e),
      FrameError::LengthMismatch { expected, actual } => PreprocessError::ShapeMismatch(format!(
        "缓冲区长度 {} 与尺寸不符, 期望 {}",
        actual, expected
      )),
      FrameError::Empty { width, height } => {
        PreprocessError::ShapeMismatch(format!("帧尺寸 {}x{} 为空", width, height))
      }
    }
  }
}

/// 将字节值映射到 [-1, 1]
#[inline]
pub fn normalize(value: f32) -> f32 {
  (value - NORMALIZE_CENTER) / NORMALIZE_CENTER
}

#[inline]
pub fn denormalize(value: f32) -> f32 {
  value * NORMALIZE_CENTER + NORMALIZE_CENTER
}

pub struct Preprocessor {
  tensor: InputTensor,
  target_width: u32,
  target_height: u32,
}

impl Preprocessor {
  pub fn new(shape: TensorShape) -> Result<Self, PreprocessError> {
    let dims = shape.dims();
    if dims.len() < 4 {
      return Err(PreprocessError::ShapeMismatch(format!(
        "输入形状 {} 至少需要 4 个维度",
        shape
      )));
    }
    if dims.contains(&0) {
      return Err(PreprocessError::ShapeMismatch(format!(
        "输入形状 {} 存在非正维度",
        shape
      )));
    }
    if dims[3] != RGB_CHANNELS {
      return Err(PreprocessError::ShapeMismatch(format!(
        "输入形状 {} 的通道数应为 {}",
        shape, RGB_CHANNELS
      )));
    }

    let target_height = u32::try_from(dims[1])
      .map_err(|_| PreprocessError::ShapeMismatch(format!("输入高度 {} 过大", dims[1])))?;
    let target_width = u32::try_from(dims[2])
      .map_err(|_| PreprocessError::ShapeMismatch(format!("输入宽度 {} 过大", dims[2])))?;

    debug!("分配输入张量: {}", shape);
    let tensor = InputTensor::with_shape(shape)?;

    Ok(Self {
      tensor,
      target_width,
      target_height,
    })
  }

  pub fn target_size(&self) -> (u32, u32) {
    (self.target_width, self.target_height)
  }

  pub fn tensor(&self) -> &InputTensor {
    &self.tensor
  }

  /// 拆分平面、逐通道缩放、重新交织、归一化并写入输入张量
  pub fn prepare(&mut self, frame: &RgbFrame) -> Result<&InputTensor, PreprocessError> {
    if frame.width() == 0 || frame.height() == 0 {
      return Err(PreprocessError::ShapeMismatch(format!(
        "帧尺寸 {}x{} 为空",
        frame.width(),
        frame.height()
      )));
    }
    let packed = self.resample(frame)?;

    let plane_size = self.target_width as usize * self.target_height as usize;
    let expected = plane_size * RGB_CHANNELS;
    // 批大小大于 1 时只写入第一张
    if packed.len() != expected || self.tensor.len() < expected {
      return Err(PreprocessError::ShapeMismatch(format!(
        "重采样结果长度 {} 与输入张量 {} 不符",
        packed.len(),
        self.tensor.shape()
      )));
    }

    for (dst, &src) in self.tensor.as_mut_slice().iter_mut().zip(packed.iter()) {
      *dst = normalize(src as f32);
    }

    Ok(&self.tensor)
  }

  /// 逐通道双线性缩放，返回 HWC 打包的字节数据
  pub fn resample(&self, frame: &RgbFrame) -> Result<Vec<u8>, PreprocessError> {
    let [red, green, blue] = frame.split_planes()?;
    let (width, height) = (self.target_width, self.target_height);

    let resized = [
      red.resize_bilinear(width, height)?,
      green.resize_bilinear(width, height)?,
      blue.resize_bilinear(width, height)?,
    ];

    Ok(PlanarBuffer::interleave(&resized)?)
  }
}
