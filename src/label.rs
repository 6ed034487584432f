// 该文件是 Qianli （千里眼） 项目的一部分。
// src/label.rs - 类别标签表
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

//! # 标签表
//!
//! 标签文件每行一个类别名，第 N 行（从 1 开始）对应类别 N。
//! 模型输出的原始类别值为 0 起始，查询时需要加 1。
//!
//! 内容为 `???` 或空行的条目仍占用编号，但不会出现在对外的类别列表中。

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// 未知类别占位符
pub const UNKNOWN_LABEL: &str = "???";

/// 默认的最大标签数量
pub const DEFAULT_MAX_LABELS: usize = 199;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("标签数量超出上限: 上限 {limit}, 实际 {found}")]
  CapacityExceeded { limit: usize, found: usize },
  #[error("类别编号 {0} 没有对应的标签")]
  OutOfRange(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  // entries[0] 对应编号 1
  entries: Vec<String>,
}

impl LabelTable {
  pub fn load(path: impl AsRef<Path>, max_entries: usize) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    let table = Self::parse(&content, max_entries)?;
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  pub fn parse(content: &str, max_entries: usize) -> Result<Self, LabelError> {
    let entries: Vec<String> = content
      .lines()
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect();

    if entries.len() > max_entries {
      return Err(LabelError::CapacityExceeded {
        limit: max_entries,
        found: entries.len(),
      });
    }

    Ok(Self { entries })
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 按 1 起始的编号查询
  pub fn get(&self, id: u32) -> Option<&str> {
    let index = (id as usize).checked_sub(1)?;
    self.entries.get(index).map(String::as_str)
  }

  /// 按模型输出的原始类别值查询，即编号 `class_id + 1`
  pub fn name_for(&self, class_id: u32) -> Result<&str, LabelError> {
    let id = class_id
      .checked_add(1)
      .ok_or(LabelError::OutOfRange(class_id))?;
    self.get(id).ok_or(LabelError::OutOfRange(class_id))
  }

  /// 对外可见的类别列表，跳过占位符与空条目，保留原始编号
  pub fn categories(&self) -> Categories<'_> {
    Categories {
      entries: self.entries.iter().enumerate(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Categories<'a> {
  entries: std::iter::Enumerate<std::slice::Iter<'a, String>>,
}

impl<'a> Iterator for Categories<'a> {
  type Item = (u32, &'a str);

  fn next(&mut self) -> Option<Self::Item> {
    self.entries.by_ref().find_map(|(index, name)| {
      if name.is_empty() || name == UNKNOWN_LABEL {
        None
      } else {
        Some((index as u32 + 1, name.as_str()))
      }
    })
  }
}
