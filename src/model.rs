// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 推理引擎接口与输出张量
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

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::{InputTensor, TensorShape},
  timing::SharedTiming,
};

const CLASS_TENSOR_KEY: &str = "class";
const SCORE_TENSOR_KEY: &str = "score";
const BOX_TENSOR_KEY: &str = "box";
const BOX_COORDS: usize = 4;

/// 推理加速器
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Accelerator {
  Cpu,
  Gpu,
  Npu,
}

impl std::fmt::Display for Accelerator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Accelerator::Cpu => "CPU",
      Accelerator::Gpu => "GPU",
      Accelerator::Npu => "NPU",
    };
    f.write_str(name)
  }
}

impl Accelerator {
  /// 在引擎支持的加速器中选择；不可用时回退到列表第一项（最通用的）
  pub fn resolve(self, supported: &[Accelerator]) -> Option<Accelerator> {
    if supported.contains(&self) {
      info!("使用 {} 运行推理", self);
      return Some(self);
    }
    let fallback = supported.first().copied()?;
    warn!("无法使用 {} 运行推理，回退到 {}", self, fallback);
    Some(fallback)
  }

  /// 未指定加速器时直接使用引擎的首选项，不产生回退警告
  pub fn select(requested: Option<Self>, supported: &[Accelerator]) -> Option<Accelerator> {
    match requested {
      Some(accelerator) => accelerator.resolve(supported),
      None => {
        let preferred = supported.first().copied()?;
        info!("使用 {} 运行推理", preferred);
        Some(preferred)
      }
    }
  }
}

/// 外部推理引擎
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  /// (batch, height, width, channels)
  fn input_shape(&self) -> TensorShape;
  fn input_names(&self) -> Vec<String> {
    Vec::new()
  }
  fn output_names(&self) -> Vec<String>;
  fn execute(&self, input: &InputTensor) -> Result<OutputTensorSet, Self::Error>;
}

/// 一次推理产生的具名输出张量，保持引擎给出的顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTensorSet {
  tensors: Vec<(String, Vec<f32>)>,
}

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("缺少名称包含 \"{0}\" 的输出张量")]
  MissingTensor(&'static str),
  #[error("边框张量长度 {0} 不是 4 的倍数")]
  MalformedBoxes(usize),
  #[error("输出张量数量不一致: 类别 {classes}, 分数 {scores}, 边框 {boxes}")]
  CountMismatch {
    classes: usize,
    scores: usize,
    boxes: usize,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TensorRole {
  Class,
  Score,
  Box,
}

impl TensorRole {
  // 与名称匹配的优先级一致: class > score > box
  fn classify(name: &str) -> Option<Self> {
    if name.contains(CLASS_TENSOR_KEY) {
      Some(TensorRole::Class)
    } else if name.contains(SCORE_TENSOR_KEY) {
      Some(TensorRole::Score)
    } else if name.contains(BOX_TENSOR_KEY) {
      Some(TensorRole::Box)
    } else {
      None
    }
  }
}

/// 已按下标对齐的一条检测记录，边框为归一化的 [ymin, xmin, ymax, xmax]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
  pub class: f32,
  pub score: f32,
  pub bbox: [f32; 4],
}

impl OutputTensorSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: impl Into<String>, values: Vec<f32>) {
    let name = name.into();
    match self.tensors.iter_mut().find(|(n, _)| *n == name) {
      Some((_, slot)) => *slot = values,
      None => self.tensors.push((name, values)),
    }
  }

  pub fn with(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
    self.insert(name, values);
    self
  }

  pub fn get(&self, name: &str) -> Option<&[f32]> {
    self
      .tensors
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v.as_slice())
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.tensors.iter().map(|(n, _)| n.as_str())
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }

  fn find_role(&self, role: TensorRole, key: &'static str) -> Result<&[f32], DecodeError> {
    self
      .tensors
      .iter()
      .find(|(name, _)| TensorRole::classify(name) == Some(role))
      .map(|(_, values)| values.as_slice())
      .ok_or(DecodeError::MissingTensor(key))
  }

  /// 将类别、分数、边框三个张量按下标合并为检测记录
  pub fn detections(&self) -> Result<Vec<RawDetection>, DecodeError> {
    let classes = self.find_role(TensorRole::Class, CLASS_TENSOR_KEY)?;
    let scores = self.find_role(TensorRole::Score, SCORE_TENSOR_KEY)?;
    let boxes = self.find_role(TensorRole::Box, BOX_TENSOR_KEY)?;

    if boxes.len() % BOX_COORDS != 0 {
      return Err(DecodeError::MalformedBoxes(boxes.len()));
    }
    let box_count = boxes.len() / BOX_COORDS;
    if classes.len() != scores.len() || classes.len() != box_count {
      return Err(DecodeError::CountMismatch {
        classes: classes.len(),
        scores: scores.len(),
        boxes: box_count,
      });
    }

    Ok(
      classes
        .iter()
        .zip(scores)
        .zip(boxes.chunks_exact(BOX_COORDS))
        .map(|((&class, &score), bbox)| RawDetection {
          class,
          score,
          bbox: [bbox[0], bbox[1], bbox[2], bbox[3]],
        })
        .collect(),
    )
  }
}

#[derive(Error, Debug)]
#[error("模型推理失败: {0}")]
pub struct InferenceError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// 调用推理引擎并统计耗时
pub struct Inference<E> {
  engine: E,
  timing: SharedTiming,
}

impl<E: InferenceEngine> Inference<E> {
  pub fn new(engine: E, timing: SharedTiming) -> Self {
    for (i, name) in engine.input_names().iter().enumerate() {
      info!("模型输入 {}: {}", i, name);
    }
    for (i, name) in engine.output_names().iter().enumerate() {
      info!("模型输出 {}: {}", i, name);
    }
    Self { engine, timing }
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  pub fn timing(&self) -> &SharedTiming {
    &self.timing
  }

  pub fn run(&self, tensor: &InputTensor) -> Result<(OutputTensorSet, Duration), InferenceError> {
    let now = Instant::now();
    let outputs = self
      .engine
      .execute(tensor)
      .map_err(|e| InferenceError(Box::new(e)))?;
    let elapsed = now.elapsed();

    match self.timing.lock() {
      Ok(mut timing) => timing.record(elapsed),
      Err(poisoned) => poisoned.into_inner().record(elapsed),
    }
    debug!("推理完成，耗时: {:.2?}", elapsed);

    Ok((outputs, elapsed))
  }
}

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnEngine, RknnEngineBuilder, RknnError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "rknpu")]
  #[error("RKNN 模型错误: {0}")]
  Rknn(#[from] RknnError),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
  #[error("模型方案 {scheme} 未编译进本程序，请启用 {feature} 特性后重新构建")]
  EngineDisabled {
    scheme: &'static str,
    feature: &'static str,
  },
}

/// 模型方案及提供该引擎的编译特性
const ENGINE_FEATURES: [(&str, &str); 1] = [("rknn", "rknpu")];

/// 按 URL 方案选择的推理引擎
pub enum EngineWrapper {
  #[cfg(feature = "rknpu")]
  Rknn(RknnEngine),
}

impl EngineWrapper {
  /// 根据 URL 方案构建推理引擎
  /// `accelerator` 为 `None` 时由引擎选择首选加速器
  pub fn build(url: &url::Url, accelerator: Option<Accelerator>) -> Result<Self, ModelError> {
    #[cfg(feature = "rknpu")]
    {
      use crate::{FromUrl, FromUrlWithScheme};

      if url.scheme() == RknnEngineBuilder::SCHEME {
        let mut builder = RknnEngineBuilder::from_url(url)?;
        if let Some(accelerator) = accelerator {
          builder = builder.accelerator(accelerator);
        }
        let engine = builder.build()?;
        return Ok(EngineWrapper::Rknn(engine));
      }
    }
    let _ = accelerator;
    match ENGINE_FEATURES.iter().find(|(scheme, _)| *scheme == url.scheme()) {
      Some(&(scheme, feature)) => Err(ModelError::EngineDisabled { scheme, feature }),
      None => Err(ModelError::SchemeMismatch(url.scheme().to_string())),
    }
  }
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct EngineWrapperError(Box<dyn std::error::Error + Send + Sync>);

impl InferenceEngine for EngineWrapper {
  type Error = EngineWrapperError;

  fn input_shape(&self) -> TensorShape {
    match *self {
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknn(ref engine) => engine.input_shape(),
    }
  }

  fn input_names(&self) -> Vec<String> {
    match *self {
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknn(ref engine) => engine.input_names(),
    }
  }

  fn output_names(&self) -> Vec<String> {
    match *self {
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknn(ref engine) => engine.output_names(),
    }
  }

  fn execute(&self, input: &InputTensor) -> Result<OutputTensorSet, Self::Error> {
    let _ = input;
    match *self {
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknn(ref engine) => engine
        .execute(input)
        .map_err(|e| EngineWrapperError(Box::new(e))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ssd_outputs() -> OutputTensorSet {
    OutputTensorSet::new()
      .with(
        "Postprocessor/BatchMultiClassNonMaxSuppression_classes",
        vec![0.0, 1.0],
      )
      .with(
        "Postprocessor/BatchMultiClassNonMaxSuppression_boxes",
        vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4],
      )
      .with(
        "Postprocessor/BatchMultiClassNonMaxSuppression_scores",
        vec![0.9, 0.4],
      )
  }

  #[test]
  fn zips_named_tensors_by_index() {
    let detections = ssd_outputs().detections().unwrap();
    assert_eq!(
      detections,
      vec![
        RawDetection {
          class: 0.0,
          score: 0.9,
          bbox: [0.1, 0.1, 0.2, 0.2]
        },
        RawDetection {
          class: 1.0,
          score: 0.4,
          bbox: [0.3, 0.3, 0.4, 0.4]
        },
      ]
    );
  }

  #[test]
  fn missing_tensor_is_reported() {
    let outputs = OutputTensorSet::new()
      .with("classes", vec![0.0])
      .with("scores", vec![0.5]);
    assert_eq!(
      outputs.detections(),
      Err(DecodeError::MissingTensor("box"))
    );
  }

  #[test]
  fn misaligned_tensors_are_rejected() {
    let outputs = OutputTensorSet::new()
      .with("classes", vec![0.0, 1.0])
      .with("scores", vec![0.5])
      .with("boxes", vec![0.0; 8]);
    assert_eq!(
      outputs.detections(),
      Err(DecodeError::CountMismatch {
        classes: 2,
        scores: 1,
        boxes: 2
      })
    );

    let outputs = OutputTensorSet::new()
      .with("classes", vec![0.0])
      .with("scores", vec![0.5])
      .with("boxes", vec![0.0; 6]);
    assert_eq!(outputs.detections(), Err(DecodeError::MalformedBoxes(6)));
  }

  #[test]
  fn name_matching_is_case_sensitive_with_class_first() {
    assert_eq!(TensorRole::classify("detection_classes"), Some(TensorRole::Class));
    assert_eq!(TensorRole::classify("MultiClass_boxes"), Some(TensorRole::Box));
    assert_eq!(TensorRole::classify("class_scores"), Some(TensorRole::Class));
    assert_eq!(TensorRole::classify("num_detections"), None);
  }

  #[test]
  fn insert_replaces_existing_name() {
    let mut outputs = OutputTensorSet::new();
    outputs.insert("scores", vec![0.1]);
    outputs.insert("scores", vec![0.2]);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs.get("scores"), Some(&[0.2][..]));
  }

  #[test]
  fn accelerator_falls_back_to_first_supported() {
    let supported = [Accelerator::Cpu, Accelerator::Gpu];
    assert_eq!(Accelerator::Gpu.resolve(&supported), Some(Accelerator::Gpu));
    assert_eq!(Accelerator::Npu.resolve(&supported), Some(Accelerator::Cpu));
    assert_eq!(Accelerator::Npu.resolve(&[]), None);
  }

  #[test]
  fn unspecified_accelerator_takes_engine_preference() {
    let npu_only = [Accelerator::Npu];
    assert_eq!(Accelerator::select(None, &npu_only), Some(Accelerator::Npu));
    assert_eq!(
      Accelerator::select(Some(Accelerator::Cpu), &npu_only),
      Some(Accelerator::Npu)
    );
    assert_eq!(Accelerator::select(None, &[]), None);
  }

  #[test]
  fn unknown_scheme_is_a_mismatch() {
    let url = url::Url::parse("onnx:///models/ssd.onnx").unwrap();
    let err = EngineWrapper::build(&url, None).err().unwrap();
    assert!(matches!(err, ModelError::SchemeMismatch(ref s) if s == "onnx"));
  }

  #[cfg(not(feature = "rknpu"))]
  #[test]
  fn disabled_engine_names_the_feature() {
    let url = url::Url::parse("rknn:///models/ssd.rknn").unwrap();
    let err = EngineWrapper::build(&url, Some(Accelerator::Npu)).err().unwrap();
    assert!(matches!(
      err,
      ModelError::EngineDisabled {
        scheme: "rknn",
        feature: "rknpu"
      }
    ));
    assert!(err.to_string().contains("rknpu"));
  }
}
