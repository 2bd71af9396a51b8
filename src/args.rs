// 该文件是 Yunmu （云目） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

/// Yunmu 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理服务器根地址
  #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:8080/")]
  pub server: Url,

  /// 摄像头输入来源
  /// 格式: v4l2:///dev/video0?width=1920&height=1440
  #[cfg(feature = "v4l_input")]
  #[arg(long, value_name = "SOURCE", default_value = "v4l2:///dev/video0")]
  pub input: Url,

  /// 叠加层视口宽度（像素）
  #[arg(long, default_value = "1080", value_name = "PIXELS")]
  pub viewport_width: f32,

  /// 叠加层视口高度（像素）
  #[arg(long, default_value = "2340", value_name = "PIXELS")]
  pub viewport_height: f32,

  /// 检测通道调度间隔（毫秒）
  #[arg(long, default_value = "250", value_name = "MS")]
  pub detect_interval_ms: u64,

  /// 描述通道调度间隔（毫秒）
  #[arg(long, default_value = "5000", value_name = "MS")]
  pub describe_interval_ms: u64,

  /// 上传图像最短边目标（像素）
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub target_min_dimension: u32,

  /// JPEG 压缩质量 (1 - 100)
  #[arg(long, default_value = "85", value_name = "QUALITY")]
  pub jpeg_quality: u8,

  /// 校准 X 轴缩放系数
  #[arg(long, default_value = "3.5", value_name = "SCALE")]
  pub view_scale_x: f32,

  /// 校准 Y 轴缩放系数
  #[arg(long, default_value = "3.5", value_name = "SCALE")]
  pub view_scale_y: f32,

  /// 校准 X 轴位移（像素）
  #[arg(long, default_value = "180", value_name = "PIXELS")]
  pub view_offset_x: f32,

  /// 校准 Y 轴位移（像素）
  #[arg(long, default_value = "100", value_name = "PIXELS")]
  pub view_offset_y: f32,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 调试记录目录（保存上传图像与检测侧录）
  #[cfg(feature = "directory_record")]
  #[arg(long, value_name = "DIR")]
  pub record_dir: Option<std::path::PathBuf>,
}
