// 该文件是 Yunmu （云目） 项目的一部分。
// src/uplink.rs - 上传通道
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

//! # 上传通道模块
//!
//! 每个通道独占一个工作线程与一条有界帧队列（容量 1），
//! 任一时刻至多一个在途上传：`submit` 在通道忙时立即拒绝并
//! 交还帧，这是调度器依赖的背压契约。
//!
//! 连接状态机 `Idle -> Connecting -> Uploading -> {Connected, Error}`
//! 仅由所属通道迁移，监听者通过订阅接口只读观察。
//! 结果经有界单消费者队列送往展示层，同一通道内按提交顺序到达。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::codec::{self, CodecError};
use crate::detector::DetectionSet;
use crate::dispatch::DispatchSink;
use crate::frame::{EncodedImage, RawFrame};
use crate::wire;

/// 用户提示的最短间隔
pub const NOTICE_INTERVAL: Duration = Duration::from_secs(5);

/// 连接状态机
///
/// 从 `Connected` 或 `Error` 回到可接收新帧的状态由
/// 在途标志清零隐含表示。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  Idle,
  Connecting,
  Uploading,
  Connected,
  Error,
}

impl std::fmt::Display for ChannelState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let text = match self {
      ChannelState::Idle => "空闲",
      ChannelState::Connecting => "连接中",
      ChannelState::Uploading => "上传中",
      ChannelState::Connected => "已连接",
      ChannelState::Error => "连接错误",
    };
    write!(f, "{}", text)
  }
}

/// 通道种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
  /// 快通道：目标检测
  Detect,
  /// 慢通道：画面描述
  Describe,
}

impl ChannelKind {
  pub fn label(&self) -> &'static str {
    match self {
      ChannelKind::Detect => "yolo",
      ChannelKind::Describe => "vlm",
    }
  }

  fn file_prefix(&self) -> &'static str {
    match self {
      ChannelKind::Detect => "YOLO",
      ChannelKind::Describe => "VLM",
    }
  }
}

pub type StatusListener = Box<dyn Fn(ChannelState) + Send + Sync>;

/// 状态单元
///
/// 状态仅由所属通道写入；监听者注册后只读观察每次迁移。
pub struct StatusCell {
  state: Mutex<ChannelState>,
  listeners: Mutex<Vec<StatusListener>>,
}

impl StatusCell {
  fn new() -> Self {
    Self {
      state: Mutex::new(ChannelState::Idle),
      listeners: Mutex::new(Vec::new()),
    }
  }

  pub fn get(&self) -> ChannelState {
    *self.state.lock().unwrap()
  }

  pub fn subscribe(&self, listener: StatusListener) {
    self.listeners.lock().unwrap().push(listener);
  }

  fn set(&self, next: ChannelState) {
    *self.state.lock().unwrap() = next;
    for listener in self.listeners.lock().unwrap().iter() {
      listener(next);
    }
  }
}

/// 速率限制的用户提示闸门
pub struct Notice {
  min_interval: Duration,
  last: Mutex<Option<Instant>>,
}

impl Notice {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last: Mutex::new(None),
    }
  }

  /// 返回 true 时本次提示放行，并重置计时
  pub fn allow(&self) -> bool {
    let mut last = self.last.lock().unwrap();
    match *last {
      Some(t) if t.elapsed() < self.min_interval => false,
      _ => {
        *last = Some(Instant::now());
        true
      }
    }
  }
}

/// 上传失败
#[derive(Error, Debug)]
pub enum UplinkError {
  #[error("帧编码错误: {0}")]
  Codec(#[from] CodecError),
  #[error("服务器返回状态码 {0}")]
  HttpStatus(u16),
  #[error("传输错误: {0}")]
  Transport(String),
  #[error("读取响应失败: {0}")]
  ReadBody(#[from] std::io::Error),
}

/// 通道结果事件
///
/// 经有界单消费者队列送往展示层；接收端先行关闭时，
/// 迟到的事件被静默丢弃。
#[derive(Debug)]
pub enum UplinkEvent {
  /// 检测通道结果，整体替换上一份集合
  Detections(DetectionSet),
  /// 描述通道结果，`audio` 为可选的 base64 音频负载
  Description {
    text: String,
    audio: Option<String>,
  },
  /// 通道故障的用户提示，已按 [`NOTICE_INTERVAL`] 限速
  Fault {
    kind: ChannelKind,
    message: String,
  },
}

/// 通道配置
pub struct UplinkConfig {
  pub kind: ChannelKind,
  pub endpoint: Url,
  pub connect_timeout: Duration,
  pub io_timeout: Duration,
  pub target_min_dimension: u32,
  pub jpeg_quality: u8,
  #[cfg(feature = "directory_record")]
  pub record: Option<Arc<crate::record::DirectoryRecord>>,
}

impl UplinkConfig {
  /// 快通道配置，超时参数按检测服务部署取值
  pub fn detect(endpoint: Url) -> Self {
    Self {
      kind: ChannelKind::Detect,
      endpoint,
      connect_timeout: Duration::from_secs(5),
      io_timeout: Duration::from_secs(10),
      target_min_dimension: codec::DEFAULT_TARGET_MIN_DIMENSION,
      jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
      #[cfg(feature = "directory_record")]
      record: None,
    }
  }

  /// 慢通道配置，描述服务响应更慢，超时放宽
  pub fn describe(endpoint: Url) -> Self {
    Self {
      kind: ChannelKind::Describe,
      endpoint,
      connect_timeout: Duration::from_secs(10),
      io_timeout: Duration::from_secs(30),
      target_min_dimension: codec::DEFAULT_TARGET_MIN_DIMENSION,
      jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
      #[cfg(feature = "directory_record")]
      record: None,
    }
  }
}

/// 上传通道
///
/// 析构时关闭帧队列并等待工作线程结束；在途上传不会被取消，
/// 运行至完成或超时后线程才退出。
pub struct UploadChannel {
  kind: ChannelKind,
  in_flight: Arc<AtomicBool>,
  status: Arc<StatusCell>,
  frames: Option<SyncSender<RawFrame>>,
  worker: Option<JoinHandle<()>>,
}

impl UploadChannel {
  /// 启动通道工作线程
  pub fn spawn(
    config: UplinkConfig,
    events: SyncSender<UplinkEvent>,
  ) -> std::io::Result<Self> {
    let kind = config.kind;
    let in_flight = Arc::new(AtomicBool::new(false));
    let status = Arc::new(StatusCell::new());
    let (frames_tx, frames_rx) = mpsc::sync_channel(1);

    let worker = {
      let in_flight = Arc::clone(&in_flight);
      let status = Arc::clone(&status);
      std::thread::Builder::new()
        .name(format!("uplink-{}", kind.label()))
        .spawn(move || worker_loop(config, frames_rx, in_flight, status, events))?
    };

    Ok(Self {
      kind,
      in_flight,
      status,
      frames: Some(frames_tx),
      worker: Some(worker),
    })
  }

  pub fn kind(&self) -> ChannelKind {
    self.kind
  }

  pub fn status(&self) -> Arc<StatusCell> {
    Arc::clone(&self.status)
  }
}

impl DispatchSink for UploadChannel {
  fn label(&self) -> &str {
    self.kind.label()
  }

  fn in_flight(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  fn submit(&self, frame: RawFrame) -> Result<(), RawFrame> {
    if self
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return Err(frame);
    }

    let Some(frames) = self.frames.as_ref() else {
      self.in_flight.store(false, Ordering::Release);
      return Err(frame);
    };

    match frames.try_send(frame) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => {
        self.in_flight.store(false, Ordering::Release);
        Err(frame)
      }
    }
  }
}

impl Drop for UploadChannel {
  fn drop(&mut self) {
    // 先关闭帧队列，等待在途上传结束后回收工作线程
    self.frames.take();
    if let Some(worker) = self.worker.take() {
      let _ = worker.join();
    }
  }
}

fn worker_loop(
  config: UplinkConfig,
  frames: Receiver<RawFrame>,
  in_flight: Arc<AtomicBool>,
  status: Arc<StatusCell>,
  events: SyncSender<UplinkEvent>,
) {
  let label = config.kind.label();
  let agent = ureq::AgentBuilder::new()
    .timeout_connect(config.connect_timeout)
    .timeout_read(config.io_timeout)
    .timeout_write(config.io_timeout)
    .build();
  let notice = Notice::new(NOTICE_INTERVAL);

  while let Ok(frame) = frames.recv() {
    let started = Instant::now();
    match attempt(&agent, &config, frame, &status) {
      Ok(Some(event)) => {
        // 接收端已关闭时静默丢弃迟到结果
        let _ = events.send(event);
      }
      Ok(None) => {}
      Err(err) => {
        status.set(ChannelState::Error);
        warn!("[{}] 上传失败: {}", label, err);
        if notice.allow() {
          let _ = events.send(UplinkEvent::Fault {
            kind: config.kind,
            message: err.to_string(),
          });
        }
      }
    }
    // 无论成败，清除在途标志，通道可接收下一帧
    in_flight.store(false, Ordering::Release);
    debug!("[{}] 上传尝试结束, 耗时 {:.2?}", label, started.elapsed());
  }

  debug!("[{}] 帧队列关闭，工作线程退出", label);
}

fn attempt(
  agent: &ureq::Agent,
  config: &UplinkConfig,
  frame: RawFrame,
  status: &StatusCell,
) -> Result<Option<UplinkEvent>, UplinkError> {
  let label = config.kind.label();

  status.set(ChannelState::Connecting);
  let encoded = codec::encode(&frame, config.target_min_dimension, config.jpeg_quality)?;
  drop(frame);

  info!(
    "[{}] 图片: {}KB, 尺寸: {}x{}",
    label,
    encoded.jpeg.len() / 1024,
    encoded.width,
    encoded.height
  );

  status.set(ChannelState::Uploading);
  let filename = format!(
    "{}_{}.jpg",
    config.kind.file_prefix(),
    Local::now().format("%Y%m%d_%H%M%S_%3f")
  );
  let (content_type, body) = multipart_form("file", &filename, "image/jpeg", &encoded.jpeg);

  let started = Instant::now();
  let response = agent
    .post(config.endpoint.as_str())
    .set("Content-Type", &content_type)
    .send_bytes(&body);

  match response {
    Ok(response) => {
      let text = response.into_string()?;
      status.set(ChannelState::Connected);
      info!(
        "[{}] 成功 ({:.0?}): {} 字节响应",
        label,
        started.elapsed(),
        text.len()
      );
      Ok(parse_event(config, &text, &encoded))
    }
    Err(ureq::Error::Status(code, _)) => Err(UplinkError::HttpStatus(code)),
    Err(err @ ureq::Error::Transport(_)) => Err(UplinkError::Transport(err.to_string())),
  }
}

/// 解析响应负载
///
/// 负载不符合格式只记录日志并按无结果处理，HTTP 交换已成功，
/// 连接状态保持 `Connected`。
fn parse_event(
  config: &UplinkConfig,
  body: &str,
  encoded: &EncodedImage,
) -> Option<UplinkEvent> {
  match config.kind {
    ChannelKind::Detect => {
      match wire::parse_detections(body, encoded.width as f32, encoded.height as f32) {
        Ok(set) => {
          #[cfg(feature = "directory_record")]
          if let Some(record) = &config.record {
            if let Err(err) = record.save(encoded, &set) {
              warn!("[yolo] 记录输出失败: {}", err);
            }
          }
          Some(UplinkEvent::Detections(set))
        }
        Err(err) => {
          warn!("[yolo] 解析响应失败: {}", err);
          None
        }
      }
    }
    ChannelKind::Describe => match wire::parse_description(body) {
      Ok(response) => Some(UplinkEvent::Description {
        text: response.result,
        audio: response.audio,
      }),
      Err(err) => {
        warn!("[vlm] 解析响应失败: {}", err);
        None
      }
    },
  }
}

/// 组装 multipart/form-data 请求体，返回 Content-Type 与完整负载
fn multipart_form(
  field: &str,
  filename: &str,
  mime: &str,
  bytes: &[u8],
) -> (String, Vec<u8>) {
  let boundary = format!("----yunmu-{}", Local::now().format("%Y%m%d%H%M%S%f"));

  let mut body = Vec::with_capacity(bytes.len() + 256);
  body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
  body.extend_from_slice(
    format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
      .as_bytes(),
  );
  body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
  body.extend_from_slice(bytes);
  body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

  (
    format!("multipart/form-data; boundary={boundary}"),
    body,
  )
}
