// 该文件是 Qianli （千里眼） 项目的一部分。
// tests/common/mod.rs - 集成测试公用的桩推理引擎
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

#![allow(dead_code)]

use std::path::Path;
use std::sync::{
  Mutex,
  atomic::{AtomicUsize, Ordering},
  mpsc::{Receiver, Sender},
};

use qianli::{
  frame::{InputTensor, TensorShape},
  model::{InferenceEngine, OutputTensorSet},
};

#[derive(Debug, thiserror::Error)]
#[error("桩引擎失败")]
pub struct StubError;

/// 每次调用都返回同一组输出的推理引擎
pub struct StubEngine {
  shape: TensorShape,
  outputs: OutputTensorSet,
  fail: bool,
  calls: AtomicUsize,
  // (进入通知, 放行信号)
  gate: Option<(Sender<()>, Mutex<Receiver<()>>)>,
}

impl StubEngine {
  pub fn new(outputs: OutputTensorSet) -> Self {
    Self {
      shape: TensorShape::new([1, 16, 16, 3]),
      outputs,
      fail: false,
      calls: AtomicUsize::new(0),
      gate: None,
    }
  }

  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::new(OutputTensorSet::new())
    }
  }

  /// execute 开始时向 entered 发送通知，然后等待 release
  pub fn gated(mut self, entered: Sender<()>, release: Receiver<()>) -> Self {
    self.gate = Some((entered, Mutex::new(release)));
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl InferenceEngine for StubEngine {
  type Error = StubError;

  fn input_shape(&self) -> TensorShape {
    self.shape.clone()
  }

  fn input_names(&self) -> Vec<String> {
    vec!["image_tensor".to_string()]
  }

  fn output_names(&self) -> Vec<String> {
    self.outputs.names().map(str::to_string).collect()
  }

  fn execute(&self, _input: &InputTensor) -> Result<OutputTensorSet, Self::Error> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some((entered, release)) = &self.gate {
      let _ = entered.send(());
      let _ = release.lock().unwrap().recv();
    }
    if self.fail {
      return Err(StubError);
    }
    Ok(self.outputs.clone())
  }
}

/// 两个候选目标：person 0.9 与 car 0.2
pub fn two_candidates() -> OutputTensorSet {
  OutputTensorSet::new()
    .with(
      "Postprocessor/BatchMultiClassNonMaxSuppression_classes",
      vec![0.0, 1.0],
    )
    .with(
      "Postprocessor/BatchMultiClassNonMaxSuppression_boxes",
      vec![0.1, 0.2, 0.5, 0.6, 0.0, 0.0, 1.0, 1.0],
    )
    .with(
      "Postprocessor/BatchMultiClassNonMaxSuppression_scores",
      vec![0.9, 0.2],
    )
}

pub fn write_jpeg(path: &Path, width: u32, height: u32) {
  image::RgbImage::from_pixel(width, height, image::Rgb([120, 60, 30]))
    .save_with_format(path, image::ImageFormat::Jpeg)
    .unwrap();
}
