// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/camera.rs - 摄像头驱动接口与 YUV 4:2:2 转换
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

//! # 摄像头输入
//!
//! 摄像头驱动在自己的线程上回调 [`FrameCallback`]，回调同步处理整帧后返回。
//! 回调期间驱动被阻塞（或自行丢帧），流水线不做排队。
//!
//! 原始缓冲区是打包的 4:2:2 格式：
//! - `Yuyv`: `Y0 U Y1 V`（V4L2 摄像头常见格式）
//! - `Uyvy`: `U Y0 V Y1`
//!
//! 处理完成后，叠加了检测结果的 RGB 帧会被写回原始缓冲区，供驱动重新显示。
//! 没有显示出口的驱动（例如 V4L2 采集）可以用 [`RawFrame::without_write_back`]
//! 关闭写回，省掉一次 RGB 到 4:2:2 的转换。

use std::ops::ControlFlow;
use std::sync::Arc;

use thiserror::Error;

use crate::frame::{RGB_CHANNELS, RgbFrame};

#[derive(Error, Debug)]
pub enum CameraError {
  #[error("摄像头查询失败: {0}")]
  Query(String),
  #[error("摄像头驱动错误: {0}")]
  Driver(String),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("{layout:?} 缓冲区长度不匹配: 期望 {expected}, 实际 {actual}")]
  BufferSize {
    layout: PixelLayout,
    expected: usize,
    actual: usize,
  },
  #[error("4:2:2 格式要求宽度为偶数, 实际宽度 {0}")]
  OddWidth(u32),
  #[error("帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("行跨度 {stride} 小于一行的数据长度 {row_len}")]
  Stride { stride: usize, row_len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
  Yuyv,
  Uyvy,
  Rgb24,
}

impl PixelLayout {
  pub fn bytes_per_pixel(&self) -> usize {
    match self {
      PixelLayout::Yuyv | PixelLayout::Uyvy => 2,
      PixelLayout::Rgb24 => RGB_CHANNELS,
    }
  }

  // 一个 4 字节宏像素内 (Y0, U, Y1, V) 的偏移
  fn yuv_offsets(&self) -> Option<[usize; 4]> {
    match self {
      PixelLayout::Yuyv => Some([0, 1, 2, 3]),
      PixelLayout::Uyvy => Some([1, 0, 3, 2]),
      PixelLayout::Rgb24 => None,
    }
  }
}

/// 驱动交给回调的原始帧，回调可以原地改写
#[derive(Debug, Clone)]
pub struct RawFrame {
  pub layout: PixelLayout,
  pub width: u32,
  pub height: u32,
  pub data: Vec<u8>,
  /// 处理后是否把叠加结果写回 `data`
  pub write_back: bool,
}

impl RawFrame {
  pub fn new(layout: PixelLayout, width: u32, height: u32, data: Vec<u8>) -> Self {
    Self {
      layout,
      width,
      height,
      data,
      write_back: true,
    }
  }

  /// 从带行填充的驱动缓冲区中逐行拷出紧凑的帧数据
  ///
  /// `stride` 是缓冲区中相邻两行起始位置的字节距离
  pub fn from_strided(
    layout: PixelLayout,
    width: u32,
    height: u32,
    stride: usize,
    buffer: &[u8],
  ) -> Result<Self, CameraError> {
    let row_len = width as usize * layout.bytes_per_pixel();
    let rows = height as usize;
    if stride < row_len {
      return Err(CameraError::Stride { stride, row_len });
    }
    // 最后一行不要求带填充
    let needed = match rows {
      0 => 0,
      n => stride * (n - 1) + row_len,
    };
    if buffer.len() < needed {
      return Err(CameraError::BufferSize {
        layout,
        expected: needed,
        actual: buffer.len(),
      });
    }

    let data = if stride == row_len {
      buffer[..needed].to_vec()
    } else {
      let mut data = Vec::with_capacity(row_len * rows);
      for row in buffer.chunks(stride).take(rows) {
        data.extend_from_slice(&row[..row_len]);
      }
      data
    };
    Ok(Self::new(layout, width, height, data))
  }

  pub fn without_write_back(mut self) -> Self {
    self.write_back = false;
    self
  }

  fn expected_len(&self) -> usize {
    self.width as usize * self.height as usize * self.layout.bytes_per_pixel()
  }

  fn check(&self) -> Result<(), CameraError> {
    if self.width == 0 || self.height == 0 {
      return Err(CameraError::EmptyFrame {
        width: self.width,
        height: self.height,
      });
    }
    let expected = self.expected_len();
    if self.data.len() != expected {
      return Err(CameraError::BufferSize {
        layout: self.layout,
        expected,
        actual: self.data.len(),
      });
    }
    if self.layout != PixelLayout::Rgb24 && self.width % 2 != 0 {
      return Err(CameraError::OddWidth(self.width));
    }
    Ok(())
  }

  pub fn to_rgb(&self) -> Result<RgbFrame, CameraError> {
    self.check()?;
    let rgb = match self.layout.yuv_offsets() {
      Some(offsets) => yuv422_to_rgb(&self.data, offsets),
      None => self.data.clone(),
    };
    RgbFrame::from_raw(self.width, self.height, rgb).map_err(|e| CameraError::Driver(e.to_string()))
  }

  /// 把 RGB 帧写回本帧的原始格式
  pub fn store_rgb(&mut self, frame: &RgbFrame) -> Result<(), CameraError> {
    self.check()?;
    if (frame.width(), frame.height()) != (self.width, self.height) {
      return Err(CameraError::BufferSize {
        layout: PixelLayout::Rgb24,
        expected: self.width as usize * self.height as usize * RGB_CHANNELS,
        actual: frame.as_packed().len(),
      });
    }
    match self.layout.yuv_offsets() {
      Some(offsets) => rgb_to_yuv422(frame.as_packed(), &mut self.data, offsets),
      None => self.data.copy_from_slice(frame.as_packed()),
    }
    Ok(())
  }
}

/// 将打包的 4:2:2 数据转换为 RGB
pub fn yuv422_to_rgb(yuv: &[u8], offsets: [usize; 4]) -> Vec<u8> {
  let [y0_at, u_at, y1_at, v_at] = offsets;
  let mut rgb = Vec::with_capacity(yuv.len() / 2 * RGB_CHANNELS);

  for chunk in yuv.chunks_exact(4) {
    let y0 = chunk[y0_at] as f32;
    let u = chunk[u_at] as f32 - 128.0;
    let y1 = chunk[y1_at] as f32;
    let v = chunk[v_at] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

/// 将 RGB 数据写回打包的 4:2:2 缓冲区，色度取相邻两像素的平均值
pub fn rgb_to_yuv422(rgb: &[u8], yuv: &mut [u8], offsets: [usize; 4]) {
  let [y0_at, u_at, y1_at, v_at] = offsets;

  for (pair, chunk) in rgb
    .chunks_exact(2 * RGB_CHANNELS)
    .zip(yuv.chunks_exact_mut(4))
  {
    let (r0, g0, b0) = (pair[0] as f32, pair[1] as f32, pair[2] as f32);
    let (r1, g1, b1) = (pair[3] as f32, pair[4] as f32, pair[5] as f32);

    let y0 = 0.299 * r0 + 0.587 * g0 + 0.114 * b0;
    let y1 = 0.299 * r1 + 0.587 * g1 + 0.114 * b1;
    let (r, g, b) = ((r0 + r1) / 2.0, (g0 + g1) / 2.0, (b0 + b1) / 2.0);
    let u = -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.419 * g - 0.081 * b + 128.0;

    chunk[y0_at] = y0.round().clamp(0.0, 255.0) as u8;
    chunk[u_at] = u.round().clamp(0.0, 255.0) as u8;
    chunk[y1_at] = y1.round().clamp(0.0, 255.0) as u8;
    chunk[v_at] = v.round().clamp(0.0, 255.0) as u8;
  }
}

/// 驱动在每一帧到达时调用的回调
pub trait FrameCallback: Send + Sync {
  /// 返回 `Break` 时驱动应停止采集
  fn on_frame(&self, frame: &mut RawFrame) -> ControlFlow<()>;
  fn on_error(&self, error: CameraError);
}

pub trait CameraDriver {
  fn start(&mut self, callback: Arc<dyn FrameCallback>) -> Result<(), CameraError>;
  fn stop(&mut self) -> Result<(), CameraError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gray_round_trips_through_uyvy() {
    let rgb = RgbFrame::from_raw(4, 2, vec![128; 4 * 2 * 3]).unwrap();
    let mut raw = RawFrame::new(PixelLayout::Uyvy, 4, 2, vec![0; 4 * 2 * 2]);

    raw.store_rgb(&rgb).unwrap();
    for chunk in raw.data.chunks_exact(4) {
      assert_eq!(chunk, &[128, 128, 128, 128]);
    }

    let back = raw.to_rgb().unwrap();
    assert!(back.as_packed().iter().all(|&v| v.abs_diff(128) <= 1));
  }

  #[test]
  fn yuyv_and_uyvy_differ_only_in_byte_order() {
    let yuyv = [81u8, 90, 81, 240];
    let uyvy = [90u8, 81, 240, 81];
    let a = yuv422_to_rgb(&yuyv, PixelLayout::Yuyv.yuv_offsets().unwrap());
    let b = yuv422_to_rgb(&uyvy, PixelLayout::Uyvy.yuv_offsets().unwrap());
    assert_eq!(a, b);
    // 红色
    assert!(a[0] > 200 && a[1] < 60 && a[2] < 60);
  }

  #[test]
  fn size_and_width_are_checked() {
    let raw = RawFrame::new(PixelLayout::Yuyv, 4, 2, vec![0; 10]);
    assert!(matches!(raw.to_rgb(), Err(CameraError::BufferSize { .. })));

    let raw = RawFrame::new(PixelLayout::Yuyv, 3, 2, vec![0; 12]);
    assert!(matches!(raw.to_rgb(), Err(CameraError::OddWidth(3))));
  }

  #[test]
  fn rgb24_is_passed_through() {
    let data: Vec<u8> = (0..12).collect();
    let mut raw = RawFrame::new(PixelLayout::Rgb24, 2, 2, data.clone());
    let frame = raw.to_rgb().unwrap();
    assert_eq!(frame.as_packed(), data.as_slice());
    raw.store_rgb(&frame).unwrap();
    assert_eq!(raw.data, data);
  }

  #[test]
  fn zero_sized_frames_are_rejected() {
    for (w, h) in [(0, 2), (4, 0)] {
      let raw = RawFrame::new(PixelLayout::Yuyv, w, h, Vec::new());
      assert!(matches!(
        raw.to_rgb(),
        Err(CameraError::EmptyFrame { .. })
      ));
    }
    let raw = RawFrame::new(PixelLayout::Rgb24, 0, 0, Vec::new());
    assert!(matches!(
      raw.to_rgb(),
      Err(CameraError::EmptyFrame { width: 0, height: 0 })
    ));
  }

  #[test]
  fn padded_rows_are_packed() {
    // 2x3 YUYV，每行 4 字节数据 + 2 字节填充
    let buffer = [1, 2, 3, 4, 0xEE, 0xEE, 5, 6, 7, 8, 0xEE, 0xEE, 9, 10, 11, 12];
    let raw = RawFrame::from_strided(PixelLayout::Yuyv, 2, 3, 6, &buffer).unwrap();
    assert_eq!(raw.data, (1..=12).collect::<Vec<u8>>());
    assert!(raw.write_back);
    assert!(raw.to_rgb().is_ok());
  }

  #[test]
  fn stride_must_cover_a_row() {
    let err = RawFrame::from_strided(PixelLayout::Yuyv, 4, 1, 6, &[0; 8]).unwrap_err();
    assert!(matches!(
      err,
      CameraError::Stride {
        stride: 6,
        row_len: 8
      }
    ));

    let err = RawFrame::from_strided(PixelLayout::Yuyv, 2, 2, 6, &[0; 9]).unwrap_err();
    assert!(matches!(
      err,
      CameraError::BufferSize {
        expected: 10,
        actual: 9,
        ..
      }
    ));
  }
}
