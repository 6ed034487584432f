// 该文件是 Qianli （千里眼） 项目的一部分。
// src/timing.rs - 推理耗时统计
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

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 推理耗时的增量平均值（微秒）
///
/// 均值以整数微秒累积，存在舍入漂移，仅用于监控。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningAverage {
  mean_us: u64,
  count: u64,
}

pub type SharedTiming = Arc<Mutex<RunningAverage>>;

impl RunningAverage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn shared() -> SharedTiming {
    Arc::new(Mutex::new(Self::new()))
  }

  pub fn record(&mut self, elapsed: Duration) {
    let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
    self.record_micros(elapsed_us);
  }

  pub fn record_micros(&mut self, elapsed_us: u64) {
    let total = u128::from(self.mean_us) * u128::from(self.count) + u128::from(elapsed_us);
    self.mean_us = (total / (u128::from(self.count) + 1)) as u64;
    self.count += 1;
  }

  pub fn current_mean(&self) -> u64 {
    self.mean_us
  }

  pub fn count(&self) -> u64 {
    self.count
  }

  pub fn throughput_fps(&self) -> Option<f64> {
    if self.mean_us == 0 {
      return None;
    }
    Some(1_000_000.0 / self.mean_us as f64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mean_of_three_samples() {
    let mut avg = RunningAverage::new();
    for us in [100, 200, 300] {
      avg.record(Duration::from_micros(us));
    }
    assert_eq!(avg.current_mean(), 200);
    assert_eq!(avg.count(), 3);
    assert_eq!(avg.throughput_fps(), Some(5000.0));
  }

  #[test]
  fn empty_average_has_no_throughput() {
    let avg = RunningAverage::new();
    assert_eq!(avg.current_mean(), 0);
    assert_eq!(avg.throughput_fps(), None);
  }

  #[test]
  fn integer_mean_drifts_downward() {
    let mut avg = RunningAverage::new();
    avg.record_micros(1);
    avg.record_micros(2);
    // (1 + 2) / 2 截断为 1
    assert_eq!(avg.current_mean(), 1);
    avg.record_micros(2);
    assert_eq!(avg.current_mean(), 1);
  }
}
