// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头驱动
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;

use tracing::{error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{CameraDriver, CameraError, FrameCallback, PixelLayout, RawFrame},
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const BUFFER_COUNT: u32 = 4;

fn v4l_error(e: std::io::Error) -> CameraError {
  CameraError::Driver(e.to_string())
}

/// `v4l:///dev/video0?width=640&height=480`
///
/// 在独立线程上以 mmap 方式采集 YUYV/UYVY 帧并回调。
/// 采集缓冲区在回调前已经拷出，因此交给回调的帧不要求写回
pub struct V4lCamera {
  device_path: String,
  width: Option<u32>,
  height: Option<u32>,
  stop: Arc<AtomicBool>,
  worker: Option<JoinHandle<()>>,
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCamera {
  type Error = CameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(CameraError::Query(format!(
        "URI 方案不匹配: {}",
        url.scheme()
      )));
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let mut width = None;
    let mut height = None;
    for (k, v) in url.query_pairs() {
      let value = || {
        v.parse::<u32>()
          .map_err(|_| CameraError::Query(format!("无效的参数 {}={}", k, v)))
      };
      match k.as_ref() {
        "width" => width = Some(value()?),
        "height" => height = Some(value()?),
        _ => {}
      }
    }

    let device = Device::with_path(&device_path)
      .map_err(|e| CameraError::Query(format!("{}: {}", device_path, e)))?;
    let format = device
      .format()
      .map_err(|e| CameraError::Query(e.to_string()))?;
    info!(
      "摄像头 {} 当前格式: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    Ok(Self {
      device_path,
      width,
      height,
      stop: Arc::new(AtomicBool::new(false)),
      worker: None,
    })
  }
}

/// 协商后的采集格式
#[derive(Debug, Clone, Copy)]
struct CaptureFormat {
  layout: PixelLayout,
  width: u32,
  height: u32,
  stride: usize,
}

impl V4lCamera {
  fn open(&self) -> Result<(Device, CaptureFormat), CameraError> {
    let device = Device::with_path(&self.device_path).map_err(v4l_error)?;
    let mut format = device.format().map_err(v4l_error)?;
    format.fourcc = FourCC::new(b"YUYV");
    if let Some(width) = self.width {
      format.width = width;
    }
    if let Some(height) = self.height {
      format.height = height;
    }
    let format = device.set_format(&format).map_err(v4l_error)?;

    let layout = match &format.fourcc.repr {
      b"YUYV" => PixelLayout::Yuyv,
      b"UYVY" => PixelLayout::Uyvy,
      _ => return Err(CameraError::UnsupportedPixelFormat(format.fourcc.to_string())),
    };
    info!(
      "摄像头采集格式: {}x{} {}, 行跨度 {}",
      format.width, format.height, format.fourcc, format.stride
    );

    // 部分驱动不填写行跨度
    let row_len = format.width as usize * layout.bytes_per_pixel();
    let stride = (format.stride as usize).max(row_len);
    Ok((
      device,
      CaptureFormat {
        layout,
        width: format.width,
        height: format.height,
        stride,
      },
    ))
  }
}

fn capture_loop(
  mut device: Device,
  format: CaptureFormat,
  stop: &AtomicBool,
  callback: &dyn FrameCallback,
) -> Result<(), CameraError> {
  let mut stream =
    Stream::with_buffers(&mut device, Type::VideoCapture, BUFFER_COUNT).map_err(v4l_error)?;

  while !stop.load(Ordering::SeqCst) {
    let (buffer, _meta) = stream.next().map_err(v4l_error)?;
    let frame = RawFrame::from_strided(
      format.layout,
      format.width,
      format.height,
      format.stride,
      buffer,
    );
    let mut frame = match frame {
      Ok(frame) => frame.without_write_back(),
      Err(e) => {
        warn!("帧数据不完整: {}", e);
        continue;
      }
    };
    if callback.on_frame(&mut frame).is_break() {
      break;
    }
  }

  Ok(())
}

impl CameraDriver for V4lCamera {
  fn start(&mut self, callback: Arc<dyn FrameCallback>) -> Result<(), CameraError> {
    if self.worker.is_some() {
      return Err(CameraError::Driver("摄像头已经启动".to_string()));
    }

    let (device, format) = self.open()?;
    self.stop.store(false, Ordering::SeqCst);
    let stop = self.stop.clone();

    let worker = std::thread::Builder::new()
      .name("v4l-capture".to_string())
      .spawn(move || {
        if let Err(e) = capture_loop(device, format, &stop, callback.as_ref()) {
          callback.on_error(e);
        }
      })
      .map_err(v4l_error)?;

    self.worker = Some(worker);
    Ok(())
  }

  fn stop(&mut self) -> Result<(), CameraError> {
    self.stop.store(true, Ordering::SeqCst);
    if let Some(worker) = self.worker.take() {
      worker
        .join()
        .map_err(|_| CameraError::Driver("采集线程异常退出".to_string()))?;
    }
    Ok(())
  }
}

impl Drop for V4lCamera {
  fn drop(&mut self) {
    if let Err(e) = self.stop() {
      warn!("{}", e);
    }
  }
}

