// 该文件是 Qianli （千里眼） 项目的一部分。
// tests/camera.rs - 摄像头流水线集成测试
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

mod common;

use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicUsize, Ordering},
  mpsc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use qianli::{
  ErrorKind, PipelineError,
  input::{CameraDriver, CameraError, FrameCallback, PixelLayout, RawFrame},
  label::{DEFAULT_MAX_LABELS, LabelTable},
  output::{Draw, OverlayOutput, SnapshotOutput},
  pipeline::{DetectionPipeline, FrameOutcome, StreamingPipeline},
  postprocess::STREAM_SCORE_THRESHOLD,
  task::{CameraTask, Task},
  timing::RunningAverage,
};

use common::{StubEngine, two_candidates};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

fn gray_frame(layout: PixelLayout) -> RawFrame {
  let data = match layout {
    PixelLayout::Yuyv | PixelLayout::Uyvy => [128, 128].repeat((WIDTH * HEIGHT) as usize),
    PixelLayout::Rgb24 => vec![128; (WIDTH * HEIGHT * 3) as usize],
  };
  RawFrame::new(layout, WIDTH, HEIGHT, data)
}

fn pipeline(engine: StubEngine) -> DetectionPipeline<StubEngine> {
  let labels = Arc::new(LabelTable::parse("person\ncar", DEFAULT_MAX_LABELS).unwrap());
  DetectionPipeline::new(
    engine,
    labels,
    STREAM_SCORE_THRESHOLD,
    RunningAverage::shared(),
  )
  .unwrap()
}

/// 在后台线程上连续投递帧的假驱动
struct FakeCamera {
  layout: PixelLayout,
  fail_with: Option<String>,
  stop: Arc<AtomicBool>,
  delivered: Arc<AtomicUsize>,
  worker: Option<JoinHandle<()>>,
}

impl FakeCamera {
  fn new(layout: PixelLayout) -> Self {
    Self {
      layout,
      fail_with: None,
      stop: Arc::new(AtomicBool::new(false)),
      delivered: Arc::new(AtomicUsize::new(0)),
      worker: None,
    }
  }

  fn failing(message: &str) -> Self {
    Self {
      fail_with: Some(message.to_string()),
      ..Self::new(PixelLayout::Yuyv)
    }
  }
}

impl CameraDriver for FakeCamera {
  fn start(&mut self, callback: Arc<dyn FrameCallback>) -> Result<(), CameraError> {
    let layout = self.layout;
    let fail_with = self.fail_with.clone();
    let stop = self.stop.clone();
    let delivered = self.delivered.clone();

    self.worker = Some(std::thread::spawn(move || {
      if let Some(message) = fail_with {
        callback.on_error(CameraError::Driver(message));
        return;
      }
      while !stop.load(Ordering::SeqCst) {
        let mut frame = gray_frame(layout);
        delivered.fetch_add(1, Ordering::SeqCst);
        if callback.on_frame(&mut frame).is_break() {
          break;
        }
      }
    }));
    Ok(())
  }

  fn stop(&mut self) -> Result<(), CameraError> {
    self.stop.store(true, Ordering::SeqCst);
    if let Some(worker) = self.worker.take() {
      worker
        .join()
        .map_err(|_| CameraError::Driver("worker panicked".to_string()))?;
    }
    Ok(())
  }
}

#[test]
fn camera_task_stops_after_frame_number() {
  let camera = FakeCamera::new(PixelLayout::Uyvy);
  let delivered = camera.delivered.clone();
  let pipeline = pipeline(StubEngine::new(two_candidates()));
  let timing = pipeline.timing().clone();

  CameraTask::default()
    .with_report_interval(Duration::from_millis(10))
    .with_frame_number(Some(3))
    .run_task(camera, pipeline, OverlayOutput::default())
    .unwrap();

  assert_eq!(delivered.load(Ordering::SeqCst), 3);
  assert_eq!(timing.lock().unwrap().count(), 3);
}

#[test]
fn camera_task_saves_snapshots_of_frames_with_detections() {
  let dir = tempfile::tempdir().unwrap();
  let output =
    OverlayOutput::new(Draw::default()).with_snapshot(Some(SnapshotOutput::new(dir.path(), false)));

  CameraTask::default()
    .with_frame_number(Some(2))
    .run_task(
      FakeCamera::new(PixelLayout::Yuyv),
      pipeline(StubEngine::new(two_candidates())),
      output,
    )
    .unwrap();

  let mut saved = 0;
  let mut pending = vec![dir.path().to_path_buf()];
  while let Some(path) = pending.pop() {
    for entry in std::fs::read_dir(path).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        pending.push(path);
      } else {
        saved += 1;
      }
    }
  }
  assert_eq!(saved, 2);
}

#[test]
fn driver_error_is_returned_to_the_caller() {
  let err = CameraTask::default()
    .run_task(
      FakeCamera::failing("no signal"),
      pipeline(StubEngine::new(two_candidates())),
      OverlayOutput::default(),
    )
    .unwrap_err();

  let err = err.downcast_ref::<PipelineError>().unwrap();
  assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn engine_failure_inside_callback_stops_the_camera() {
  let camera = FakeCamera::new(PixelLayout::Yuyv);
  let delivered = camera.delivered.clone();

  let err = CameraTask::default()
    .run_task(camera, pipeline(StubEngine::failing()), OverlayOutput::default())
    .unwrap_err();

  assert_eq!(
    err.downcast_ref::<PipelineError>().unwrap().kind(),
    ErrorKind::Engine
  );
  assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_frame_is_dropped_while_one_is_in_flight() {
  let (entered_tx, entered_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel();
  let engine = StubEngine::new(two_candidates()).gated(entered_tx, release_rx);
  let streaming = Arc::new(StreamingPipeline::new(
    pipeline(engine),
    OverlayOutput::default(),
  ));

  let first = {
    let streaming = streaming.clone();
    std::thread::spawn(move || {
      let mut frame = gray_frame(PixelLayout::Yuyv);
      streaming.on_frame(&mut frame).unwrap()
    })
  };

  entered_rx.recv().unwrap();
  let mut second = gray_frame(PixelLayout::Yuyv);
  let untouched = second.data.clone();
  assert_eq!(streaming.on_frame(&mut second).unwrap(), FrameOutcome::Dropped);
  assert_eq!(second.data, untouched);

  release_tx.send(()).unwrap();
  assert_eq!(first.join().unwrap(), FrameOutcome::Processed(1));
}

#[test]
fn overlay_is_written_back_in_the_driver_layout() {
  let streaming = StreamingPipeline::new(
    pipeline(StubEngine::new(two_candidates())),
    OverlayOutput::default(),
  );
  let mut frame = gray_frame(PixelLayout::Uyvy);
  let before = frame.data.clone();

  assert_eq!(
    streaming.on_frame(&mut frame).unwrap(),
    FrameOutcome::Processed(1)
  );
  assert_eq!(frame.layout, PixelLayout::Uyvy);
  assert_eq!(frame.data.len(), before.len());
  assert_ne!(frame.data, before);
}
