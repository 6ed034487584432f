// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 图片批处理与摄像头任务
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

use std::ops::ControlFlow;
use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
  mpsc::{self, RecvTimeoutError, Sender},
};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::{
  error::PipelineError,
  input::{CameraDriver, CameraError, FrameCallback, InputError, RawFrame, SourceImage},
  model::InferenceEngine,
  output::{OverlayOutput, Render},
  pipeline::{DetectionPipeline, FrameOutcome, StreamingPipeline},
  postprocess::DetectResult,
  timing::SharedTiming,
};

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

fn report_timing(timing: &SharedTiming, since_start: Duration) {
  let timing = timing.lock().unwrap_or_else(|e| e.into_inner());
  match timing.throughput_fps() {
    Some(fps) => info!(
      "平均推理速度 (0~{}s): {:.2} fps, {} us, 共 {} 次",
      since_start.as_secs(),
      fps,
      timing.current_mean(),
      timing.count()
    ),
    None => info!("平均推理速度 (0~{}s): 暂无数据", since_start.as_secs()),
  }
}

/// 单张图像解码失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DecodeErrorPolicy {
  /// 终止整个批处理
  #[default]
  Abort,
  /// 记录警告后跳过该文件
  Skip,
}

/// 逐张处理目录中的图像，结束时写出检测文档
#[derive(Debug, Default)]
pub struct BatchTask {
  policy: DecodeErrorPolicy,
}

impl BatchTask {
  pub fn with_policy(mut self, policy: DecodeErrorPolicy) -> Self {
    self.policy = policy;
    self
  }
}

impl<I, E, O> Task<I, DetectionPipeline<E>, O> for BatchTask
where
  I: Iterator<Item = Result<SourceImage, InputError>>,
  E: InferenceEngine,
  O: Render<SourceImage, DetectResult>,
  PipelineError: From<O::Error>,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    mut pipeline: DetectionPipeline<E>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始批处理任务...");
    let started = Instant::now();
    let mut skipped = 0usize;

    for item in input {
      let image = match item {
        Ok(image) => image,
        Err(e) if e.is_decode() && self.policy == DecodeErrorPolicy::Skip => {
          warn!("跳过无法解码的图像: {}", e);
          skipped += 1;
          continue;
        }
        Err(e) => {
          error!("{}", e);
          return Err(PipelineError::Input(e).into());
        }
      };

      info!(
        "处理第 {} 张图像: {} ({}x{})",
        image.id,
        image.file_name,
        image.frame.width(),
        image.frame.height()
      );
      let result = pipeline.detect(&image.frame)?;
      output
        .render_result(&image, &result)
        .map_err(PipelineError::from)?;
    }

    output.finish().map_err(PipelineError::from)?;

    if skipped > 0 {
      warn!("共跳过 {} 张无法解码的图像", skipped);
    }
    report_timing(pipeline.timing(), started.elapsed());
    info!("任务完成，退出");
    Ok(())
  }
}

#[derive(Debug)]
enum CameraEvent {
  Interrupted,
  Finished,
  Failed(PipelineError),
}

struct FrameHandler<E> {
  pipeline: StreamingPipeline<E>,
  events: Sender<CameraEvent>,
  processed: AtomicUsize,
  frame_number: Option<usize>,
}

impl<E> FrameCallback for FrameHandler<E>
where
  E: InferenceEngine + Send,
{
  fn on_frame(&self, frame: &mut RawFrame) -> ControlFlow<()> {
    match self.pipeline.on_frame(frame) {
      Ok(FrameOutcome::Processed(count)) => {
        let index = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("第 {} 帧: {} 个目标", index, count);
        if self.frame_number.is_some_and(|n| index >= n) {
          info!("达到指定帧数 {}, 停止采集", index);
          let _ = self.events.send(CameraEvent::Finished);
          return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
      }
      Ok(FrameOutcome::Dropped) => ControlFlow::Continue(()),
      Err(e) => {
        error!("帧处理失败: {}", e);
        let _ = self.events.send(CameraEvent::Failed(e));
        ControlFlow::Break(())
      }
    }
  }

  fn on_error(&self, error: CameraError) {
    error!("摄像头错误: {}", error);
    let _ = self.events.send(CameraEvent::Failed(error.into()));
  }
}

/// 摄像头任务：驱动在自己的线程上回调，主线程定期汇报推理速度直到停止
#[derive(Debug)]
pub struct CameraTask {
  report_interval: Duration,
  frame_number: Option<usize>,
  interrupt_handler: bool,
}

impl Default for CameraTask {
  fn default() -> Self {
    Self {
      report_interval: DEFAULT_REPORT_INTERVAL,
      frame_number: None,
      interrupt_handler: false,
    }
  }
}

impl CameraTask {
  pub fn with_report_interval(mut self, interval: Duration) -> Self {
    self.report_interval = interval;
    self
  }

  /// 0 或 None 表示不限帧数
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number.filter(|&n| n > 0);
    self
  }

  /// 收到 Ctrl-C 时停止采集。进程内只能注册一次
  pub fn with_interrupt_handler(mut self) -> Self {
    self.interrupt_handler = true;
    self
  }
}

impl<D, E> Task<D, DetectionPipeline<E>, OverlayOutput> for CameraTask
where
  D: CameraDriver,
  E: InferenceEngine + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut driver: D,
    pipeline: DetectionPipeline<E>,
    output: OverlayOutput,
  ) -> Result<(), Self::Error> {
    info!("开始摄像头任务...");
    let (tx, rx) = mpsc::channel();

    if self.interrupt_handler {
      let tx = tx.clone();
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(CameraEvent::Interrupted);
      })?;
    }

    let timing = pipeline.timing().clone();
    let handler = Arc::new(FrameHandler {
      pipeline: StreamingPipeline::new(pipeline, output),
      events: tx,
      processed: AtomicUsize::new(0),
      frame_number: self.frame_number,
    });

    driver.start(handler.clone()).map_err(PipelineError::from)?;

    let started = Instant::now();
    let event = loop {
      match rx.recv_timeout(self.report_interval) {
        Ok(event) => break event,
        Err(RecvTimeoutError::Timeout) => report_timing(&timing, started.elapsed()),
        Err(RecvTimeoutError::Disconnected) => break CameraEvent::Finished,
      }
    };

    match &event {
      CameraEvent::Interrupted => warn!("中断信号接收，停止摄像头"),
      CameraEvent::Finished => info!("采集结束，停止摄像头"),
      CameraEvent::Failed(_) => warn!("处理失败，停止摄像头"),
    }
    driver.stop().map_err(PipelineError::from)?;

    report_timing(&timing, started.elapsed());
    info!(
      "共处理 {} 帧",
      handler.processed.load(Ordering::SeqCst)
    );

    match event {
      CameraEvent::Failed(e) => Err(e.into()),
      _ => Ok(()),
    }
  }
}
