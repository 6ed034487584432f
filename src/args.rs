// 该文件是 Qianli （千里眼） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

use qianli::{
  label::DEFAULT_MAX_LABELS,
  model::Accelerator,
  postprocess::{BATCH_SCORE_THRESHOLD, STREAM_SCORE_THRESHOLD},
  task::DecodeErrorPolicy,
};

/// Qianli 目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 检测目录中的所有图像，输出 COCO 格式的 JSON
  Image(ImageArgs),
  /// 对摄像头画面进行实时检测并叠加结果
  Camera(CameraArgs),
}

/// 两种模式共用的模型参数
#[derive(ClapArgs, Debug)]
pub struct ModelArgs {
  /// 模型地址，例如 rknn:///path/to/model.rknn?shape=1,300,300,3
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 标签文件，每行一个类别名
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,

  /// 标签文件最多允许的行数
  #[arg(long, default_value_t = DEFAULT_MAX_LABELS, value_name = "COUNT")]
  pub max_labels: usize,

  /// 推理加速器，未指定时使用模型引擎的首选项
  #[arg(long, value_enum, ignore_case = true)]
  pub accelerator: Option<Accelerator>,
}

#[derive(ClapArgs, Debug)]
pub struct ImageArgs {
  #[command(flatten)]
  pub common: ModelArgs,

  /// 图像目录，例如 folder:///data/images?ext=jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 检测结果 JSON 文件路径
  #[arg(long, value_name = "FILE")]
  pub output: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = BATCH_SCORE_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// 图像无法解码时终止还是跳过
  #[arg(long, value_enum, default_value_t = DecodeErrorPolicy::Abort)]
  pub on_decode_error: DecodeErrorPolicy,
}

#[derive(ClapArgs, Debug)]
pub struct CameraArgs {
  #[command(flatten)]
  pub common: ModelArgs,

  /// 摄像头设备，例如 v4l:///dev/video0?width=640&height=480
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 快照保存目录，例如 folder:///data/snapshots?always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = STREAM_SCORE_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// 标签字体文件 (TTF/OTF)，未指定时只绘制边框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 推理速度汇报间隔（秒）
  #[arg(long, default_value_t = 10, value_name = "SECONDS")]
  pub report_interval: u64,

  /// 处理指定帧数后退出，0 表示不限制
  #[arg(long, default_value_t = 0, value_name = "FRAME_NUMBER")]
  pub frame_number: usize,
}
