// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess.rs - 检测结果后处理
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

use tracing::{debug, warn};

use crate::{
  label::LabelTable,
  model::{DecodeError, OutputTensorSet, RawDetection},
};

/// 图片模式的默认置信度阈值
pub const BATCH_SCORE_THRESHOLD: f32 = 0.3;
/// 摄像头模式的默认置信度阈值
pub const STREAM_SCORE_THRESHOLD: f32 = 0.5;

/// 原始帧像素坐标下的边框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x_min: f32,
  pub y_min: f32,
  pub x_max: f32,
  pub y_max: f32,
}

impl BoundingBox {
  pub fn width(&self) -> f32 {
    self.x_max - self.x_min
  }

  pub fn height(&self) -> f32 {
    self.y_max - self.y_min
  }

  /// [x, y, w, h]
  pub fn to_xywh(&self) -> [f32; 4] {
    [self.x_min, self.y_min, self.width(), self.height()]
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 标签表编号，即原始类别值 + 1
  pub category_id: u32,
  pub score: f32,
  pub bbox: BoundingBox,
  pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl FromIterator<Detection> for DetectResult {
  fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
    DetectResult {
      items: iter.into_iter().collect::<Vec<_>>().into_boxed_slice(),
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Postprocessor {
  threshold: f32,
}

impl Postprocessor {
  pub fn new(threshold: f32) -> Self {
    Self { threshold }
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  /// 解码输出张量，按阈值过滤，并换算到原始帧 (width, height) 的像素坐标
  pub fn decode<'a>(
    &self,
    tensors: &OutputTensorSet,
    frame_dims: (u32, u32),
    labels: &'a LabelTable,
  ) -> Result<Detections<'a>, DecodeError> {
    let raw = tensors.detections()?;
    debug!("模型输出 {} 个候选目标", raw.len());
    Ok(Detections {
      raw: raw.into_iter(),
      threshold: self.threshold,
      width: frame_dims.0 as f32,
      height: frame_dims.1 as f32,
      labels,
    })
  }
}

/// 一次性的检测结果序列
pub struct Detections<'a> {
  raw: std::vec::IntoIter<RawDetection>,
  threshold: f32,
  width: f32,
  height: f32,
  labels: &'a LabelTable,
}

impl Detections<'_> {
  fn convert(&self, raw: RawDetection) -> Detection {
    let [ymin, xmin, ymax, xmax] = raw.bbox;
    let class_id = raw.class as u32;

    let label = match self.labels.name_for(class_id) {
      Ok(name) => Some(name.to_string()),
      Err(e) => {
        warn!("{}", e);
        None
      }
    };

    Detection {
      category_id: class_id.saturating_add(1),
      score: raw.score,
      bbox: BoundingBox {
        x_min: xmin * self.width,
        y_min: ymin * self.height,
        x_max: xmax * self.width,
        y_max: ymax * self.height,
      },
      label,
    }
  }
}

impl Iterator for Detections<'_> {
  type Item = Detection;

  fn next(&mut self) -> Option<Self::Item> {
    let threshold = self.threshold;
    let raw = self.raw.by_ref().find(|raw| raw.score >= threshold)?;
    Some(self.convert(raw))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, self.raw.size_hint().1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::DEFAULT_MAX_LABELS;

  fn outputs() -> OutputTensorSet {
    OutputTensorSet::new()
      .with("detection_scores", vec![0.9, 0.4])
      .with("detection_classes", vec![0.0, 1.0])
      .with(
        "detection_boxes",
        vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4],
      )
  }

  fn labels() -> LabelTable {
    LabelTable::parse("cat\ndog", DEFAULT_MAX_LABELS).unwrap()
  }

  #[test]
  fn threshold_filters_strictly_below() {
    let labels = labels();

    let kept: Vec<_> = Postprocessor::new(0.5)
      .decode(&outputs(), (100, 100), &labels)
      .unwrap()
      .collect();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].category_id, 1);
    assert_eq!(kept[0].label.as_deref(), Some("cat"));
    assert!((kept[0].score - 0.9).abs() < 1e-6);

    let kept: Vec<_> = Postprocessor::new(0.3)
      .decode(&outputs(), (100, 100), &labels)
      .unwrap()
      .collect();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[1].label.as_deref(), Some("dog"));

    let kept = Postprocessor::new(0.4)
      .decode(&outputs(), (100, 100), &labels)
      .unwrap()
      .count();
    assert_eq!(kept, 2);
  }

  #[test]
  fn boxes_scale_to_source_frame() {
    let outputs = OutputTensorSet::new()
      .with("classes", vec![0.0])
      .with("scores", vec![0.8])
      .with("boxes", vec![0.25, 0.25, 0.75, 0.75]);
    let labels = labels();

    let detection = Postprocessor::new(0.5)
      .decode(&outputs, (200, 100), &labels)
      .unwrap()
      .next()
      .unwrap();

    assert_eq!(detection.bbox.to_xywh(), [50.0, 25.0, 100.0, 50.0]);
  }

  #[test]
  fn unknown_class_keeps_detection_without_label() {
    let outputs = OutputTensorSet::new()
      .with("classes", vec![7.0])
      .with("scores", vec![0.8])
      .with("boxes", vec![0.0, 0.0, 1.0, 1.0]);
    let labels = labels();

    let detection = Postprocessor::new(0.5)
      .decode(&outputs, (10, 10), &labels)
      .unwrap()
      .next()
      .unwrap();
    assert_eq!(detection.category_id, 8);
    assert_eq!(detection.label, None);
  }

  #[test]
  fn nothing_above_threshold_yields_empty() {
    let labels = labels();
    let result: DetectResult = Postprocessor::new(0.95)
      .decode(&outputs(), (100, 100), &labels)
      .unwrap()
      .collect();
    assert!(result.is_empty());
  }
}
