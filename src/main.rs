// 该文件是 Yunmu （云目） 项目的一部分。
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

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  run(args)
}

#[cfg(feature = "v4l_input")]
fn run(args: args::Args) -> Result<()> {
  use std::sync::mpsc;
  use std::time::{Duration, Instant};

  use tracing::{debug, info, warn};

  use yunmu::FromUrl;
  use yunmu::dispatch::DispatchOutcome;
  use yunmu::input::CameraInput;
  use yunmu::project::{Calibration, ViewProjector, Viewport};
  use yunmu::session::{CaptureSession, DETECT_SLOT, SessionConfig};
  use yunmu::uplink::UplinkEvent;

  info!("服务器地址: {}", args.server);
  info!("输入来源: {}", args.input);
  info!(
    "视口: {}x{}, 调度间隔: 检测 {}ms / 描述 {}ms",
    args.viewport_width, args.viewport_height, args.detect_interval_ms, args.describe_interval_ms
  );

  let mut config = SessionConfig::from_server(&args.server)?;
  config.detect_interval = Duration::from_millis(args.detect_interval_ms);
  config.describe_interval = Duration::from_millis(args.describe_interval_ms);
  config.target_min_dimension = args.target_min_dimension;
  config.jpeg_quality = args.jpeg_quality;
  #[cfg(feature = "directory_record")]
  {
    config.record = args
      .record_dir
      .as_ref()
      .map(|dir| std::sync::Arc::new(yunmu::record::DirectoryRecord::new(dir, false)));
  }

  let (mut session, events) = CaptureSession::start(config)?;

  if let Some(status) = session.status(DETECT_SLOT) {
    status.subscribe(Box::new(|state| info!("[yolo] 状态: {}", state)));
  }

  let projector = ViewProjector::new(Calibration {
    scale_x: args.view_scale_x,
    scale_y: args.view_scale_y,
    offset_x: args.view_offset_x,
    offset_y: args.view_offset_y,
  });
  let viewport = Viewport {
    width: args.viewport_width,
    height: args.viewport_height,
  };

  let (stop_tx, stop_rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    let _ = stop_tx.send(());
  })
  .expect("Error setting Ctrl-C handler");

  info!("正在打开摄像头...");
  let input = CameraInput::from_url(&args.input)?;

  info!("开始采集...");
  let mut frame_count = 0u64;
  let start_time = Instant::now();

  for frame in input {
    let frame = frame?;
    frame_count += 1;

    if args.max_frames > 0 && frame_count > args.max_frames {
      info!("已达到最大帧数限制: {}", args.max_frames);
      break;
    }

    match session.push_frame(frame) {
      DispatchOutcome::Accepted { slot } => debug!("帧 {} 已调度至通道 {}", frame_count, slot),
      DispatchOutcome::Dropped => {}
    }

    // 非阻塞排空结果事件
    while let Ok(event) = events.try_recv() {
      match event {
        UplinkEvent::Detections(set) => {
          let boxes = projector.project(&set, viewport);
          info!("[yolo] {} 个目标, {} 个可见", set.items.len(), boxes.len());
          for projected in &boxes {
            info!(
              "  - {} at ({:.0}, {:.0}, {:.0}x{:.0})",
              projected.label,
              projected.clipped.left,
              projected.clipped.top,
              projected.clipped.right - projected.clipped.left,
              projected.clipped.bottom - projected.clipped.top
            );
          }
        }
        UplinkEvent::Description { text, audio } => {
          info!(
            "[vlm] 识别结果: {}, 音频: {}",
            text,
            if audio.is_some() { "有" } else { "无" }
          );
        }
        UplinkEvent::Fault { kind, message } => {
          warn!("[{}] 服务器连接失败: {}", kind.label(), message);
        }
      }
    }

    if frame_count % 30 == 0 {
      let elapsed = start_time.elapsed().as_secs_f64();
      if elapsed > 0.0 {
        info!("FPS: {:.1}", frame_count as f64 / elapsed);
      }
    }

    if stop_rx.try_recv().is_ok() {
      warn!("中断信号接收，退出采集循环");
      break;
    }
  }

  // 会话析构时等待在途上传结束
  drop(session);

  info!("任务完成，退出");
  info!("总帧数: {}", frame_count);
  Ok(())
}

#[cfg(not(feature = "v4l_input"))]
fn run(_args: args::Args) -> Result<()> {
  anyhow::bail!("未启用摄像头输入特性，请以 --features v4l_input 构建")
}
