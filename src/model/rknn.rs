// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/rknn.rs - RKNN 推理引擎适配
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

use std::collections::HashMap;

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputTensor, TensorShape},
  model::{Accelerator, InferenceEngine, OutputTensorSet},
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_DEFAULT_SHAPE: [usize; 4] = [1, 300, 300, 3];
const RKNN_DEFAULT_OUTPUTS: [&str; 3] = [
  "Postprocessor/BatchMultiClassNonMaxSuppression_classes",
  "Postprocessor/BatchMultiClassNonMaxSuppression_boxes",
  "Postprocessor/BatchMultiClassNonMaxSuppression_scores",
];
const RKNN_SUPPORTED_ACCELERATORS: [Accelerator; 1] = [Accelerator::Npu];

#[derive(Error, Debug)]
pub enum RknnError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("没有可用的加速器")]
  NoAccelerator,
}

impl RknnError {
  fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct RknnEngineBuilder {
  model_path: String,
  shape: TensorShape,
  output_names: Vec<String>,
  accelerator: Option<Accelerator>,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnEngineBuilder {
  type Error = RknnError;

  /// `rknn:///path/model.rknn?shape=1,300,300,3&outputs=classes,boxes,scores`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let shape = match query.get("shape") {
      Some(shape) => shape
        .parse::<TensorShape>()
        .map_err(|e| RknnError::ModelPathError(format!("无效的输入形状 {}: {}", shape, e)))?,
      None => TensorShape::new(RKNN_DEFAULT_SHAPE.to_vec()),
    };

    let output_names = match query.get("outputs") {
      Some(names) => names.split(',').map(|n| n.trim().to_string()).collect(),
      None => RKNN_DEFAULT_OUTPUTS.iter().map(|n| n.to_string()).collect(),
    };

    Ok(RknnEngineBuilder {
      model_path: url.path().to_string(),
      shape,
      output_names,
      accelerator: None,
      flags: InitFlags::default(),
    })
  }
}

impl RknnEngineBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn accelerator(mut self, accelerator: Accelerator) -> Self {
    self.accelerator = Some(accelerator);
    self
  }

  pub fn build(self) -> Result<RknnEngine, RknnError> {
    Accelerator::select(self.accelerator, &RKNN_SUPPORTED_ACCELERATORS)
      .ok_or(RknnError::NoAccelerator)?;

    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(RknnError::invalid(
        &format!(
          "预期模型输入数量为 {}, 实际为 {}",
          RKNN_NUM_INPUTS, num_inputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    if num_outputs as usize != self.output_names.len() {
      error!(
        "配置了 {} 个输出名称, 模型实际有 {} 个输出",
        self.output_names.len(),
        num_outputs
      );
      return Err(RknnError::invalid(
        &format!(
          "配置了 {} 个输出名称, 模型实际有 {} 个输出",
          self.output_names.len(),
          num_outputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    info!("模型加载完成");
    Ok(RknnEngine {
      context,
      shape: self.shape,
      output_names: self.output_names,
    })
  }
}

pub struct RknnEngine {
  context: Context,
  shape: TensorShape,
  output_names: Vec<String>,
}

impl InferenceEngine for RknnEngine {
  type Error = RknnError;

  fn input_shape(&self) -> TensorShape {
    self.shape.clone()
  }

  fn input_names(&self) -> Vec<String> {
    vec!["input".to_string()]
  }

  fn output_names(&self) -> Vec<String> {
    self.output_names.clone()
  }

  fn execute(&self, input: &InputTensor) -> Result<OutputTensorSet, Self::Error> {
    let bytes: Vec<u8> = input
      .as_slice()
      .iter()
      .flat_map(|v| v.to_ne_bytes())
      .collect();

    debug!("设置模型输入");
    self
      .context
      .set_input(0, &bytes, TensorFormat::NHWC, TensorType::Float32)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;

    let mut tensors = OutputTensorSet::new();
    for (index, name) in self.output_names.iter().enumerate() {
      let values = output.get_f32(index)?;
      tensors.insert(name.clone(), values.to_vec());
    }
    Ok(tensors)
  }
}
