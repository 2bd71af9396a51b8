// 该文件是 Yunmu （云目） 项目的一部分。
// src/dispatch.rs - 帧调度器
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

//! # 帧调度模块
//!
//! 每帧到达时在固定优先级顺序下做一次同步 O(1) 决策：
//! 帧交给第一个到期且无在途上传的通道，否则立即丢弃。
//! 丢帧而非排队，使缓慢的远端自然转化为背压，
//! 内存占用与端到端延迟都有上界。

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::frame::RawFrame;

/// 上传通道在调度器中的接口
///
/// `submit` 在通道已有在途上传时必须立即拒绝并交还帧，
/// 这是调度器依赖的背压契约。
pub trait DispatchSink {
  fn label(&self) -> &str;
  fn in_flight(&self) -> bool;
  fn submit(&self, frame: RawFrame) -> Result<(), RawFrame>;
}

struct CadenceSlot<S> {
  sink: S,
  interval: Duration,
  last_dispatch: Option<Instant>,
}

/// 调度结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
  /// 帧已交给编号为 `slot` 的通道
  Accepted { slot: usize },
  /// 没有通道接收，帧已丢弃
  Dropped,
}

/// 双节拍帧调度器
///
/// 通道按加入顺序排定优先级；`last_dispatch` 仅在
/// 通道实际接收帧时更新。
pub struct DispatchScheduler<S> {
  slots: Vec<CadenceSlot<S>>,
}

impl<S: DispatchSink> DispatchScheduler<S> {
  pub fn new() -> Self {
    Self { slots: Vec::new() }
  }

  /// 追加一个通道，返回其槽位编号；先加入的优先级更高
  pub fn add_channel(&mut self, sink: S, interval: Duration) -> usize {
    self.slots.push(CadenceSlot {
      sink,
      interval,
      last_dispatch: None,
    });
    self.slots.len() - 1
  }

  pub fn slot_count(&self) -> usize {
    self.slots.len()
  }

  pub fn sink(&self, slot: usize) -> Option<&S> {
    self.slots.get(slot).map(|s| &s.sink)
  }

  /// 调度一帧
  ///
  /// 帧的所有权随决策移动：要么交给恰好一个通道，要么就地释放。
  pub fn dispatch(&mut self, frame: RawFrame, now: Instant) -> DispatchOutcome {
    let mut frame = frame;

    for (idx, slot) in self.slots.iter_mut().enumerate() {
      let due = slot
        .last_dispatch
        .map_or(true, |t| now.duration_since(t) >= slot.interval);
      if !due {
        continue;
      }
      if slot.sink.in_flight() {
        trace!("[{}] 通道到期但仍在上传，跳过", slot.sink.label());
        continue;
      }

      match slot.sink.submit(frame) {
        Ok(()) => {
          slot.last_dispatch = Some(now);
          debug!("[{}] 帧已调度", slot.sink.label());
          return DispatchOutcome::Accepted { slot: idx };
        }
        Err(returned) => {
          // 提交竞争失败，继续尝试后续通道
          frame = returned;
        }
      }
    }

    trace!("没有通道接收，帧被丢弃");
    DispatchOutcome::Dropped
  }
}

impl<S: DispatchSink> Default for DispatchScheduler<S> {
  fn default() -> Self {
    Self::new()
  }
}
