// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/overlay.rs - 在帧上叠加检测结果
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::info;

use crate::{
  frame::RgbFrame,
  output::{OutputError, Render, SnapshotOutput},
  postprocess::{DetectResult, Detection},
};

const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// 检测框绘制。没有字体时只画边框
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      color: BOX_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, OutputError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| OutputError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let font = FontVec::try_from_vec(data).map_err(|_| OutputError::Font(path.to_path_buf()))?;
    info!("已加载标签字体 {}", path.display());

    Ok(Self {
      font: Some(font),
      ..Default::default()
    })
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    for detection in result.iter() {
      self.draw_bbox_with_label(image, detection);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (detection.bbox.x_min.floor() as i32).clamp(0, w - 1);
    let y_min = (detection.bbox.y_min.floor() as i32).clamp(0, h - 1);
    let x_max = (detection.bbox.x_max.ceil() as i32).clamp(0, w - 1);
    let y_max = (detection.bbox.y_max.ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.color);
    for t in 0..BOX_THICKNESS {
      let (width, height) = (x_max - x_min - 2 * t + 1, y_max - y_min - 2 * t + 1);
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let name = match &detection.label {
      Some(name) => name.clone(),
      None => detection.category_id.to_string(),
    };
    let label = format!("class: {}, prob: {:.1}", name, detection.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);

    let label_h = text_h as i32 + 2 * LABEL_PADDING;
    let label_x = x_min;
    let label_y = if y_min >= label_h { y_min - label_h } else { y_min };
    let label_w = (text_w as i32 + 2 * LABEL_PADDING).min(w - label_x);
    if label_w <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      label_x + LABEL_PADDING,
      label_y + LABEL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

/// 摄像头模式的输出：原地绘制检测结果，并可选保存快照
#[derive(Default)]
pub struct OverlayOutput {
  draw: Draw,
  snapshot: Option<SnapshotOutput>,
}

impl OverlayOutput {
  pub fn new(draw: Draw) -> Self {
    Self {
      draw,
      snapshot: None,
    }
  }

  pub fn with_snapshot(mut self, snapshot: Option<SnapshotOutput>) -> Self {
    self.snapshot = snapshot;
    self
  }

  pub fn annotate(&self, frame: &mut RgbFrame, result: &DetectResult) -> Result<(), OutputError> {
    self.draw.draw_detections(frame.image_mut(), result);
    if let Some(snapshot) = &self.snapshot {
      snapshot.render_result(frame, result)?;
    }
    Ok(())
  }
}
