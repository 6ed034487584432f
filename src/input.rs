// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input.rs - 图像目录与摄像头输入
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

use std::path::PathBuf;

use thiserror::Error;

mod camera;
pub use self::camera::{
  CameraDriver, CameraError, FrameCallback, PixelLayout, RawFrame, rgb_to_yuv422, yuv422_to_rgb,
};

mod image_directory;
pub use self::image_directory::{ImageDirectoryInput, SourceImage};

#[cfg(feature = "v4l_input")]
mod v4l_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l_camera::V4lCamera;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解码图像 {path}: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

impl InputError {
  /// 单个文件的解码失败，调度层可以选择跳过
  pub fn is_decode(&self) -> bool {
    matches!(self, InputError::Decode { .. })
  }
}
