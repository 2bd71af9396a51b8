// 该文件是 Yunmu （云目） 项目的一部分。
// src/session.rs - 采集会话
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

//! # 采集会话模块
//!
//! 会话是调度器与两条上传通道的唯一所有者，句柄存续期间
//! 资源有效；句柄析构时关闭帧队列，等待在途上传结束后回收
//! 工作线程。事件接收端先行关闭时，迟到结果被静默丢弃而不会
//! 作用到已拆除的状态上。

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::codec;
use crate::dispatch::{DispatchOutcome, DispatchScheduler};
use crate::frame::RawFrame;
use crate::uplink::{StatusCell, UplinkConfig, UplinkEvent, UploadChannel};

/// 快通道默认调度间隔
pub const DETECT_INTERVAL: Duration = Duration::from_millis(250);
/// 慢通道默认调度间隔
pub const DESCRIBE_INTERVAL: Duration = Duration::from_millis(5000);

/// 快通道槽位编号
pub const DETECT_SLOT: usize = 0;
/// 慢通道槽位编号
pub const DESCRIBE_SLOT: usize = 1;

const EVENT_QUEUE_CAPACITY: usize = 8;

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("服务器地址无效: {0}")]
  BadEndpoint(#[from] url::ParseError),
  #[error("无法创建上传线程: {0}")]
  Spawn(#[from] io::Error),
}

/// 会话配置
pub struct SessionConfig {
  pub detect_endpoint: Url,
  pub describe_endpoint: Url,
  pub detect_interval: Duration,
  pub describe_interval: Duration,
  pub target_min_dimension: u32,
  pub jpeg_quality: u8,
  #[cfg(feature = "directory_record")]
  pub record: Option<Arc<crate::record::DirectoryRecord>>,
}

impl SessionConfig {
  /// 基于服务器根地址构建双通道默认配置
  pub fn from_server(server: &Url) -> Result<Self, SessionError> {
    Ok(Self {
      detect_endpoint: server.join("yolo")?,
      describe_endpoint: server.join("detect")?,
      detect_interval: DETECT_INTERVAL,
      describe_interval: DESCRIBE_INTERVAL,
      target_min_dimension: codec::DEFAULT_TARGET_MIN_DIMENSION,
      jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
      #[cfg(feature = "directory_record")]
      record: None,
    })
  }
}

/// 采集会话句柄
pub struct CaptureSession {
  scheduler: DispatchScheduler<UploadChannel>,
}

impl CaptureSession {
  /// 启动会话，返回句柄与结果事件接收端
  ///
  /// 事件队列有界且单消费者；同一通道的结果按提交顺序到达。
  pub fn start(config: SessionConfig) -> Result<(Self, Receiver<UplinkEvent>), SessionError> {
    let (events_tx, events_rx) = mpsc::sync_channel(EVENT_QUEUE_CAPACITY);

    let mut detect_config = UplinkConfig::detect(config.detect_endpoint);
    detect_config.target_min_dimension = config.target_min_dimension;
    detect_config.jpeg_quality = config.jpeg_quality;
    #[cfg(feature = "directory_record")]
    {
      detect_config.record = config.record;
    }

    let mut describe_config = UplinkConfig::describe(config.describe_endpoint);
    describe_config.target_min_dimension = config.target_min_dimension;
    describe_config.jpeg_quality = config.jpeg_quality;

    let detect = UploadChannel::spawn(detect_config, events_tx.clone())?;
    let describe = UploadChannel::spawn(describe_config, events_tx)?;

    // 快通道先加入，优先级更高
    let mut scheduler = DispatchScheduler::new();
    scheduler.add_channel(detect, config.detect_interval);
    scheduler.add_channel(describe, config.describe_interval);

    info!(
      "采集会话已启动: 检测间隔 {:?}, 描述间隔 {:?}",
      config.detect_interval, config.describe_interval
    );

    Ok((Self { scheduler }, events_rx))
  }

  /// 推入一帧
  ///
  /// 决策同步完成，从不阻塞生产者；帧的所有权随决策移动。
  pub fn push_frame(&mut self, frame: RawFrame) -> DispatchOutcome {
    self.scheduler.dispatch(frame, Instant::now())
  }

  /// 指定槽位通道的状态单元
  pub fn status(&self, slot: usize) -> Option<Arc<StatusCell>> {
    self.scheduler.sink(slot).map(|channel| channel.status())
  }
}
