// 该文件是 Qianli （千里眼） 项目的一部分。
// src/error.rs - 流水线错误分类
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

use crate::{
  frame::FrameError,
  input::{CameraError, InputError},
  label::LabelError,
  model::{DecodeError, InferenceError},
  output::OutputError,
  preprocess::PreprocessError,
};

/// 错误类别，供调度层决定终止、跳过或退出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// 标签、张量分配、形状等启动阶段错误
  Setup,
  /// 推理引擎错误
  Engine,
  /// 单个输入帧错误
  Frame,
  /// 摄像头等运行时资源错误
  Resource,
  /// 结果写出错误
  Output,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("标签错误: {0}")]
  Label(#[from] LabelError),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error(transparent)]
  Inference(#[from] InferenceError),
  #[error("输出解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("摄像头错误: {0}")]
  Camera(#[from] CameraError),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
}

impl PipelineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::Label(_) | PipelineError::Preprocess(_) => ErrorKind::Setup,
      PipelineError::Inference(_) | PipelineError::Decode(_) => ErrorKind::Engine,
      PipelineError::Input(InputError::Decode { .. }) => ErrorKind::Frame,
      PipelineError::Input(_) => ErrorKind::Setup,
      PipelineError::Camera(_) | PipelineError::Frame(_) => ErrorKind::Resource,
      PipelineError::Output(_) => ErrorKind::Output,
    }
  }
}
