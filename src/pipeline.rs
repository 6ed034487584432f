// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline.rs - 检测流水线
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

//! # 检测流水线
//!
//! 原始帧 → [`Preprocessor`] → [`Inference`] → [`Postprocessor`] → 输出。
//!
//! [`DetectionPipeline`] 持有输入张量，跨帧复用，只能被一个调用者独占使用。
//! 摄像头模式下由 [`StreamingPipeline`] 用互斥锁保证同一时间只有一帧在处理，
//! 重入的回调直接丢帧而不是等待。

use std::sync::{Arc, Mutex, TryLockError};

use tracing::{debug, warn};

use crate::{
  error::PipelineError,
  frame::RgbFrame,
  input::RawFrame,
  label::LabelTable,
  model::{Inference, InferenceEngine},
  output::OverlayOutput,
  postprocess::{DetectResult, Postprocessor},
  preprocess::Preprocessor,
  timing::SharedTiming,
};

pub struct DetectionPipeline<E> {
  preprocessor: Preprocessor,
  inference: Inference<E>,
  postprocessor: Postprocessor,
  labels: Arc<LabelTable>,
}

impl<E: InferenceEngine> DetectionPipeline<E> {
  pub fn new(
    engine: E,
    labels: Arc<LabelTable>,
    threshold: f32,
    timing: SharedTiming,
  ) -> Result<Self, PipelineError> {
    let shape = engine.input_shape();
    debug!("模型输入形状: {}", shape);
    let preprocessor = Preprocessor::new(shape)?;

    Ok(Self {
      preprocessor,
      inference: Inference::new(engine, timing),
      postprocessor: Postprocessor::new(threshold),
      labels,
    })
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn timing(&self) -> &SharedTiming {
    self.inference.timing()
  }

  pub fn threshold(&self) -> f32 {
    self.postprocessor.threshold()
  }

  pub fn detect(&mut self, frame: &RgbFrame) -> Result<DetectResult, PipelineError> {
    let tensor = self.preprocessor.prepare(frame)?;
    let (outputs, _) = self.inference.run(tensor)?;
    let result: DetectResult = self
      .postprocessor
      .decode(&outputs, (frame.width(), frame.height()), &self.labels)?
      .collect();
    debug!("检测到 {} 个目标", result.len());
    Ok(result)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  /// 帧已处理，附带检测到的目标数
  Processed(usize),
  /// 上一帧仍在处理，本帧被丢弃
  Dropped,
}

pub struct StreamingPipeline<E> {
  pipeline: Mutex<DetectionPipeline<E>>,
  output: OverlayOutput,
}

impl<E: InferenceEngine> StreamingPipeline<E> {
  pub fn new(pipeline: DetectionPipeline<E>, output: OverlayOutput) -> Self {
    Self {
      pipeline: Mutex::new(pipeline),
      output,
    }
  }

  /// 同步处理一帧：转换、检测、绘制，帧要求写回时再写回原始缓冲区
  pub fn on_frame(&self, raw: &mut RawFrame) -> Result<FrameOutcome, PipelineError> {
    let mut pipeline = match self.pipeline.try_lock() {
      Ok(pipeline) => pipeline,
      Err(TryLockError::WouldBlock) => {
        warn!("上一帧仍在处理，丢弃当前帧");
        return Ok(FrameOutcome::Dropped);
      }
      Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };

    let mut frame = raw.to_rgb()?;
    let result = pipeline.detect(&frame)?;
    self.output.annotate(&mut frame, &result)?;
    if raw.write_back {
      raw.store_rgb(&frame)?;
    }

    Ok(FrameOutcome::Processed(result.len()))
  }
}
