// 该文件是 Yunmu （云目） 项目的一部分。
// src/input.rs - V4L2 摄像头输入
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

//! # V4L2 摄像头输入模块
//!
//! 采集层协作者的参考实现：打开 V4L2 设备捕获 YUYV 帧，
//! 转换为流水线要求的三平面 YUV 4:2:0 [`RawFrame`]。
//!
//! ## 基本用法
//!
//! ```no_run
//! use yunmu::{FromUrl, input::CameraInput};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("v4l2:///dev/video0?width=1920&height=1440")?;
//! let input = CameraInput::from_url(&url)?;
//!
//! for frame in input {
//!     let frame = frame?;
//!     // 交给调度器
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::time::Instant;

use thiserror::Error;
use tracing::info;
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::frame::{Plane, RawFrame};
use crate::{FromUrl, FromUrlWithScheme};

/// 默认采集宽度
pub const DEFAULT_CAPTURE_WIDTH: u32 = 1920;
/// 默认采集高度
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 1440;

/// 摄像头输入错误
#[derive(Error, Debug)]
pub enum CameraInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("设备 I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("设备返回的帧格式不是 YUYV: {0}")]
  UnsupportedFormat(FourCC),
}

/// V4L2 摄像头输入源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct CameraInput {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// 帧宽度
  width: u32,
  /// 帧高度
  height: u32,
  /// 开始时间
  start_time: Instant,
}

impl FromUrlWithScheme for CameraInput {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for CameraInput {
  type Error = CameraInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CameraInputError::SchemeMismatch);
    }

    let mut width = DEFAULT_CAPTURE_WIDTH;
    let mut height = DEFAULT_CAPTURE_HEIGHT;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => width = value.parse().unwrap_or(DEFAULT_CAPTURE_WIDTH),
        "height" => height = value.parse().unwrap_or(DEFAULT_CAPTURE_HEIGHT),
        _ => {}
      }
    }

    Self::new(url.path(), width, height)
  }
}

impl CameraInput {
  /// 打开设备并启动捕获流
  pub fn new(device_path: &str, width: u32, height: u32) -> Result<Self, CameraInputError> {
    let device = Box::pin(Device::with_path(device_path)?);

    // 设置视频格式
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(CameraInputError::UnsupportedFormat(format.fourcc));
    }

    info!(
      "摄像头已打开: {} {}x{}",
      device_path, format.width, format.height
    );

    let mut source = Self {
      device,
      stream: None,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    // 创建捕获流
    // SAFETY: device 被 Pin<Box> 固定，不会移动，所以引用始终有效
    // Stream 的生命周期通过 source 的 Drop 来管理
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      // 将设备引用的生命周期延长到 'static
      // 这是安全的，因为:
      // 1. device 被 Pin<Box> 固定在堆上，不会移动
      // 2. stream 存储在同一个结构体中，会在 device 之前被 drop
      // 3. Drop 顺序：stream (Option::take) -> device
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, 4)?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// 距采集启动的毫秒数
  pub fn elapsed_ms(&self) -> u64 {
    self.start_time.elapsed().as_millis() as u64
  }

  /// 将打包的 YUYV 4:2:2 转换为三平面 YUV 4:2:0
  ///
  /// 色度在垂直方向取偶数行完成 2x2 子采样。
  fn yuyv_to_planes(yuyv: &[u8], width: u32, height: u32) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w / 2, h / 2);

    let mut y_plane = vec![0u8; w * h];
    let mut u_plane = vec![0u8; cw * ch];
    let mut v_plane = vec![0u8; cw * ch];

    for row in 0..h {
      for pair in 0..cw {
        let offset = (row * cw + pair) * 4;
        y_plane[row * w + pair * 2] = yuyv[offset];
        y_plane[row * w + pair * 2 + 1] = yuyv[offset + 2];

        if row % 2 == 0 {
          u_plane[(row / 2) * cw + pair] = yuyv[offset + 1];
          v_plane[(row / 2) * cw + pair] = yuyv[offset + 3];
        }
      }
    }

    RawFrame {
      y: Plane::new(y_plane, w, 1),
      u: Plane::new(u_plane, cw, 1),
      v: Plane::new(v_plane, cw, 1),
      width,
      height,
    }
  }
}

impl Drop for CameraInput {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl Iterator for CameraInput {
  type Item = Result<RawFrame, CameraInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    match stream.next() {
      Ok((buffer, _meta)) => {
        let expected = (self.width * self.height * 2) as usize;
        if buffer.len() < expected {
          return Some(Err(CameraInputError::Io(std::io::Error::other(format!(
            "帧数据不足: 需要 {} 字节, 实际 {} 字节",
            expected,
            buffer.len()
          )))));
        }

        Some(Ok(Self::yuyv_to_planes(buffer, self.width, self.height)))
      }
      Err(e) => Some(Err(CameraInputError::Io(e))),
    }
  }
}
