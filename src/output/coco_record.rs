// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/coco_record.rs - COCO 格式检测结果记录
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

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  input::SourceImage,
  label::LabelTable,
  output::{OutputError, Render},
  postprocess::DetectResult,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoCategory {
  pub id: u32,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
  pub id: u32,
  pub file_name: String,
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
  pub image_id: u32,
  /// [x, y, w, h]，原图像素坐标
  pub bbox: [f32; 4],
  pub category_id: u32,
  pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoDocument {
  pub categories: Vec<CocoCategory>,
  pub images: Vec<CocoImage>,
  pub annotations: Vec<CocoAnnotation>,
}

impl CocoDocument {
  pub fn with_categories(labels: &LabelTable) -> Self {
    Self {
      categories: labels
        .categories()
        .map(|(id, name)| CocoCategory {
          id,
          name: name.to_string(),
        })
        .collect(),
      ..Default::default()
    }
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, OutputError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| OutputError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
  }

  pub fn push(&mut self, image: &SourceImage, result: &DetectResult) {
    self.images.push(CocoImage {
      id: image.id,
      file_name: image.file_name.clone(),
      width: image.frame.width(),
      height: image.frame.height(),
    });
    self
      .annotations
      .extend(result.iter().map(|detection| CocoAnnotation {
        image_id: image.id,
        bbox: detection.bbox.to_xywh(),
        category_id: detection.category_id,
        score: detection.score,
      }));
  }
}

/// 累积所有图像的检测结果，结束时一次性写出 JSON 文档
pub struct CocoRecordOutput {
  path: PathBuf,
  document: Mutex<CocoDocument>,
}

impl CocoRecordOutput {
  pub fn new(path: impl Into<PathBuf>, labels: &LabelTable) -> Self {
    Self {
      path: path.into(),
      document: Mutex::new(CocoDocument::with_categories(labels)),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn io_error(&self, source: std::io::Error) -> OutputError {
    OutputError::Io {
      path: self.path.clone(),
      source,
    }
  }
}

impl Render<SourceImage, DetectResult> for CocoRecordOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &SourceImage, result: &DetectResult) -> Result<(), Self::Error> {
    let mut document = self.document.lock().unwrap_or_else(|e| e.into_inner());
    document.push(frame, result);
    Ok(())
  }

  fn finish(&self) -> Result<(), Self::Error> {
    let document = self.document.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
    }

    let file = File::create(&self.path).map_err(|e| self.io_error(e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &*document)?;
    writer.flush().map_err(|e| self.io_error(e))?;

    info!(
      "检测结果已写入 {}: {} 张图像, {} 个目标",
      self.path.display(),
      document.images.len(),
      document.annotations.len()
    );
    Ok(())
  }
}
