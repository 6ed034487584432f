// 该文件是 Qianli （千里眼） 项目的一部分。
// src/frame.rs - 帧、平面缓冲区与输入张量定义
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

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  Empty { width: u32, height: u32 },
  #[error("内存分配失败: {0}")]
  Allocation(#[from] std::collections::TryReserveError),
}

/// 分配一个长度为 `len` 的零值缓冲区，分配失败时返回错误而不是中止进程
pub(crate) fn try_zeroed<T: Clone + Default>(
  len: usize,
) -> Result<Vec<T>, std::collections::TryReserveError> {
  let mut buffer = Vec::new();
  buffer.try_reserve_exact(len)?;
  buffer.resize(len, T::default());
  Ok(buffer)
}

/// 一个方向上的插值采样点：相邻两个源索引及远端权重
#[derive(Debug, Clone, Copy)]
struct Sample {
  near: usize,
  far: usize,
  weight: f32,
}

impl Sample {
  fn along(dst: usize, src_len: u32, dst_len: u32) -> Self {
    let scale = src_len as f32 / dst_len as f32;
    let last = (src_len - 1) as f32;
    let pos = ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, last);
    let near = pos.floor() as usize;
    Self {
      near,
      far: (near + 1).min(src_len as usize - 1),
      weight: pos - near as f32,
    }
  }

  fn mix(&self, near: u8, far: u8) -> f32 {
    let near = near as f32;
    near + (far as f32 - near) * self.weight
  }
}

/// 打包的 RGB 帧（HWC 排列，每像素 3 字节）
#[derive(Debug, Clone)]
pub struct RgbFrame {
  image: RgbImage,
}

impl RgbFrame {
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::LengthMismatch {
      expected,
      actual: 0,
    })?;
    Ok(Self { image })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_packed(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn into_raw(self) -> Vec<u8> {
    self.image.into_raw()
  }

  /// 将打包的 RGB 数据拆分为 R、G、B 三个平面
  pub fn split_planes(&self) -> Result<[PlanarBuffer; RGB_CHANNELS], FrameError> {
    let (width, height) = (self.width(), self.height());
    let plane_size = width as usize * height as usize;

    let mut red = try_zeroed::<u8>(plane_size)?;
    let mut green = try_zeroed::<u8>(plane_size)?;
    let mut blue = try_zeroed::<u8>(plane_size)?;

    for (i, pixel) in self.as_packed().chunks_exact(RGB_CHANNELS).enumerate() {
      red[i] = pixel[0];
      green[i] = pixel[1];
      blue[i] = pixel[2];
    }

    Ok([
      PlanarBuffer::from_parts(width, height, red),
      PlanarBuffer::from_parts(width, height, green),
      PlanarBuffer::from_parts(width, height, blue),
    ])
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

/// 单通道平面缓冲区，仅在一次预处理中存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanarBuffer {
  width: u32,
  height: u32,
  data: Vec<u8>,
}

impl PlanarBuffer {
  fn from_parts(width: u32, height: u32, data: Vec<u8>) -> Self {
    debug_assert_eq!(data.len(), width as usize * height as usize);
    Self {
      width,
      height,
      data,
    }
  }

  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self::from_parts(width, height, data))
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  /// 双线性插值缩放到目标尺寸，只处理本通道
  ///
  /// 像素中心对齐：目标像素 `d` 对应源坐标 `(d + 0.5) * src / dst - 0.5`，
  /// 越界的坐标钳位到边缘像素
  pub fn resize_bilinear(&self, width: u32, height: u32) -> Result<PlanarBuffer, FrameError> {
    if self.width == 0 || self.height == 0 {
      return Err(FrameError::Empty {
        width: self.width,
        height: self.height,
      });
    }
    if (self.width, self.height) == (width, height) {
      return Ok(self.clone());
    }

    let src_w = self.width as usize;
    let dst_w = width as usize;
    let dst_h = height as usize;
    let columns: Vec<Sample> = (0..dst_w)
      .map(|x| Sample::along(x, self.width, width))
      .collect();

    let mut data = try_zeroed::<u8>(dst_w * dst_h)?;
    for (y, row) in data.chunks_exact_mut(dst_w.max(1)).enumerate().take(dst_h) {
      let sy = Sample::along(y, self.height, height);
      let top = &self.data[sy.near * src_w..(sy.near + 1) * src_w];
      let bottom = &self.data[sy.far * src_w..(sy.far + 1) * src_w];
      for (value, sx) in row.iter_mut().zip(&columns) {
        let upper = sx.mix(top[sx.near], top[sx.far]);
        let lower = sx.mix(bottom[sx.near], bottom[sx.far]);
        *value = (upper + (lower - upper) * sy.weight).round().clamp(0.0, 255.0) as u8;
      }
    }

    Ok(PlanarBuffer::from_parts(width, height, data))
  }

  /// 将三个等尺寸平面重新交织为 HWC 打包数据
  pub fn interleave(planes: &[PlanarBuffer; RGB_CHANNELS]) -> Result<Vec<u8>, FrameError> {
    let [red, green, blue] = planes;
    let plane_size = red.data.len();
    for plane in [green, blue] {
      if plane.data.len() != plane_size {
        return Err(FrameError::LengthMismatch {
          expected: plane_size,
          actual: plane.data.len(),
        });
      }
    }

    let mut packed = try_zeroed::<u8>(plane_size * RGB_CHANNELS)?;
    for (i, pixel) in packed.chunks_exact_mut(RGB_CHANNELS).enumerate() {
      pixel[0] = red.data[i];
      pixel[1] = green.data[i];
      pixel[2] = blue.data[i];
    }
    Ok(packed)
  }
}

/// 模型输入形状，按 (batch, height, width, channels) 解释
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorShape {
  dims: Vec<usize>,
}

impl TensorShape {
  pub fn new(dims: impl Into<Vec<usize>>) -> Self {
    Self { dims: dims.into() }
  }

  pub fn dims(&self) -> &[usize] {
    &self.dims
  }

  pub fn batch(&self) -> Option<usize> {
    self.dims.first().copied()
  }

  pub fn height(&self) -> Option<usize> {
    self.dims.get(1).copied()
  }

  pub fn width(&self) -> Option<usize> {
    self.dims.get(2).copied()
  }

  pub fn channels(&self) -> Option<usize> {
    self.dims.get(3).copied()
  }

  pub fn element_count(&self) -> usize {
    self.dims.iter().product()
  }
}

impl std::fmt::Display for TensorShape {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
    write!(f, "[{}]", dims.join(", "))
  }
}

impl std::str::FromStr for TensorShape {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let dims = s
      .split(',')
      .map(|d| d.trim().parse::<usize>())
      .collect::<Result<Vec<_>, _>>()?;
    Ok(TensorShape::new(dims))
  }
}

/// 归一化后的模型输入张量，整个流水线生命周期内复用
#[derive(Debug, Clone)]
pub struct InputTensor {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn with_shape(shape: TensorShape) -> Result<Self, FrameError> {
    let data = try_zeroed::<f32>(shape.element_count())?.into_boxed_slice();
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> &TensorShape {
    &self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn split_and_interleave_restore_the_packed_frame() {
    let data: Vec<u8> = (0..2 * 3 * 3).map(|v| v as u8).collect();
    let frame = RgbFrame::from_raw(3, 2, data.clone()).unwrap();

    let planes = frame.split_planes().unwrap();
    assert_eq!(planes[0].as_slice(), &[0, 3, 6, 9, 12, 15]);
    assert_eq!(planes[1].as_slice(), &[1, 4, 7, 10, 13, 16]);
    assert_eq!(planes[2].as_slice(), &[2, 5, 8, 11, 14, 17]);

    assert_eq!(PlanarBuffer::interleave(&planes).unwrap(), data);
  }

  #[test]
  fn frame_rejects_short_buffer() {
    let err = RgbFrame::from_raw(4, 4, vec![0; 10]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 48,
        actual: 10
      }
    ));
  }

  #[test]
  fn resize_keeps_constant_plane_constant() {
    let plane = PlanarBuffer::new(8, 6, vec![77; 48]).unwrap();
    let resized = plane.resize_bilinear(3, 5).unwrap();
    assert_eq!(resized.width(), 3);
    assert_eq!(resized.height(), 5);
    assert!(resized.as_slice().iter().all(|&v| v == 77));
  }

  #[test]
  fn halving_a_ramp_samples_pixel_centres() {
    let plane = PlanarBuffer::new(4, 1, vec![0, 0, 255, 255]).unwrap();
    let resized = plane.resize_bilinear(2, 1).unwrap();
    assert_eq!(resized.as_slice(), &[0, 255]);
  }

  #[test]
  fn upscaling_interpolates_and_clamps_edges() {
    let plane = PlanarBuffer::new(2, 2, vec![0, 100, 0, 100]).unwrap();
    let resized = plane.resize_bilinear(4, 1).unwrap();
    assert_eq!(resized.as_slice(), &[0, 25, 75, 100]);
  }

  #[test]
  fn empty_plane_cannot_be_resized() {
    let plane = PlanarBuffer::new(0, 4, Vec::new()).unwrap();
    let err = plane.resize_bilinear(2, 2).unwrap_err();
    assert!(matches!(err, FrameError::Empty { width: 0, height: 4 }));
  }

  #[test]
  fn tensor_shape_parses_comma_list() {
    let shape: TensorShape = "1, 300,300,3".parse().unwrap();
    assert_eq!(shape.dims(), &[1, 300, 300, 3]);
    assert_eq!(shape.height(), Some(300));
    assert_eq!(shape.channels(), Some(3));
    assert_eq!(shape.to_string(), "[1, 300, 300, 3]");
  }
}
