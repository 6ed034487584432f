// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, input::InputError};

const DEFAULT_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

/// 目录中的一张已解码图像
#[derive(Debug, Clone)]
pub struct SourceImage {
  /// 从 1 开始，按处理顺序编号
  pub id: u32,
  pub file_name: String,
  pub frame: RgbFrame,
}

/// 按文件名顺序逐张读取目录中的图像
pub struct ImageDirectoryInput {
  directory: PathBuf,
  files: std::vec::IntoIter<PathBuf>,
  next_id: u32,
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = InputError;

  /// `folder:///path/to/images?ext=jpg,png`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let extensions: Vec<String> = url
      .query_pairs()
      .find(|(k, _)| k == "ext")
      .map(|(_, v)| v.split(',').map(|e| e.trim().to_string()).collect())
      .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect());

    Self::open(url.path(), &extensions)
  }
}

impl ImageDirectoryInput {
  pub fn open(directory: impl AsRef<Path>, extensions: &[String]) -> Result<Self, InputError> {
    let directory = directory.as_ref().to_path_buf();
    let io_error = |source| InputError::Io {
      path: directory.clone(),
      source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&directory).map_err(io_error)? {
      let path = entry.map_err(io_error)?.path();
      if path.is_file() && has_extension(&path, extensions) {
        files.push(path);
      }
    }
    files.sort();

    info!(
      "图像目录 {} 中找到 {} 张图像",
      directory.display(),
      files.len()
    );

    Ok(Self {
      directory,
      files: files.into_iter(),
      next_id: 1,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn remaining(&self) -> usize {
    self.files.len()
  }

  fn decode(path: &Path) -> Result<RgbFrame, InputError> {
    let image = ImageReader::open(path)
      .map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
      })?
      .with_guessed_format()
      .map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
      })?
      .decode()
      .map_err(|source| InputError::Decode {
        path: path.to_path_buf(),
        source,
      })?;

    Ok(RgbFrame::from(image.to_rgb8()))
  }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    .unwrap_or(false)
}

impl Iterator for ImageDirectoryInput {
  type Item = Result<SourceImage, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.files.next()?;
    let file_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();

    debug!("解码图像: {}", file_name);
    Some(Self::decode(&path).map(|frame| {
      let id = self.next_id;
      self.next_id += 1;
      SourceImage {
        id,
        file_name,
        frame,
      }
    }))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.files.len()))
  }
}
