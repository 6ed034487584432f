// 该文件是 Qianli （千里眼） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use qianli::{
  FromUrl,
  input::ImageDirectoryInput,
  label::LabelTable,
  model::EngineWrapper,
  output::CocoRecordOutput,
  pipeline::DetectionPipeline,
  task::{BatchTask, Task},
  timing::RunningAverage,
};

use args::{Args, CameraArgs, Command, ImageArgs, ModelArgs};

fn build_pipeline(
  args: &ModelArgs,
  threshold: f32,
) -> Result<(Arc<LabelTable>, DetectionPipeline<EngineWrapper>)> {
  info!("模型地址: {}", args.model);
  info!("标签文件: {}", args.labels.display());
  info!("置信度阈值: {}", threshold);

  let labels = Arc::new(LabelTable::load(&args.labels, args.max_labels)?);
  let engine = EngineWrapper::build(&args.model, args.accelerator)?;
  let pipeline =
    DetectionPipeline::new(engine, labels.clone(), threshold, RunningAverage::shared())?;
  Ok((labels, pipeline))
}

fn run_image(args: ImageArgs) -> Result<()> {
  info!("输入目录: {}", args.input);
  info!("输出文件: {}", args.output.display());

  let (labels, pipeline) = build_pipeline(&args.common, args.threshold)?;
  let input = ImageDirectoryInput::from_url(&args.input)?;
  let output = CocoRecordOutput::new(&args.output, &labels);

  BatchTask::default()
    .with_policy(args.on_decode_error)
    .run_task(input, pipeline, output)
}

#[cfg(feature = "v4l_input")]
fn run_camera(args: CameraArgs) -> Result<()> {
  use std::time::Duration;

  use qianli::{
    input::V4lCamera,
    output::{Draw, OverlayOutput, SnapshotOutput},
    task::CameraTask,
  };

  info!("输入来源: {}", args.input);

  let (_, pipeline) = build_pipeline(&args.common, args.threshold)?;
  let camera = V4lCamera::from_url(&args.input)?;

  let draw = match &args.font {
    Some(font) => Draw::with_font_file(font)?,
    None => Draw::default(),
  };
  let snapshot = args
    .output
    .as_ref()
    .map(SnapshotOutput::from_url)
    .transpose()?;
  let output = OverlayOutput::new(draw).with_snapshot(snapshot);

  CameraTask::default()
    .with_report_interval(Duration::from_secs(args.report_interval.max(1)))
    .with_frame_number(Some(args.frame_number))
    .with_interrupt_handler()
    .run_task(camera, pipeline, output)
}

#[cfg(not(feature = "v4l_input"))]
fn run_camera(args: CameraArgs) -> Result<()> {
  anyhow::bail!(
    "摄像头输入 {} 需要启用 v4l_input 特性",
    args.input
  )
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  match args.command {
    Command::Image(args) => run_image(args),
    Command::Camera(args) => run_camera(args),
  }
}
