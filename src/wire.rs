// 该文件是 Yunmu （云目） 项目的一部分。
// src/wire.rs - 服务器负载格式
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

//! # 线上负载模块
//!
//! 两个推理端点的响应格式：
//!
//! - 检测端点 `POST /yolo`:
//!   `{"result": [{"x", "y", "w", "h", "confidence", "class_name"}, ...]}`
//! - 描述端点 `POST /detect`:
//!   `{"result": "...", "audio": "base64..."}`（`audio` 可选）
//!
//! 同一组类型同时服务于客户端解析与服务端序列化。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detector::{Detection, DetectionSet};

/// 负载解析错误
///
/// HTTP 交换本身已成功，仅响应体不符合预期格式；
/// 调用方记录日志并按无结果处理，不改变连接状态。
#[derive(Error, Debug)]
pub enum PayloadError {
  #[error("响应负载不符合预期格式: {0}")]
  Json(#[from] serde_json::Error),
}

/// 检测端点响应中的单个检测条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDetection {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  pub confidence: f32,
  pub class_name: String,
}

/// 检测端点响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
  pub result: Vec<WireDetection>,
}

/// 描述端点响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResponse {
  pub result: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub audio: Option<String>,
}

impl From<WireDetection> for Detection {
  fn from(wire: WireDetection) -> Self {
    Detection {
      x: wire.x,
      y: wire.y,
      w: wire.w,
      h: wire.h,
      class_name: wire.class_name,
      confidence: wire.confidence,
    }
  }
}

impl From<&Detection> for WireDetection {
  fn from(det: &Detection) -> Self {
    WireDetection {
      x: det.x,
      y: det.y,
      w: det.w,
      h: det.h,
      confidence: det.confidence,
      class_name: det.class_name.clone(),
    }
  }
}

/// 解析检测端点响应体
///
/// `image_width`/`image_height` 为产生该结果的上传图像尺寸快照。
pub fn parse_detections(
  body: &str,
  image_width: f32,
  image_height: f32,
) -> Result<DetectionSet, PayloadError> {
  let response: DetectResponse = serde_json::from_str(body)?;
  Ok(DetectionSet {
    items: response.result.into_iter().map(Detection::from).collect(),
    image_width,
    image_height,
  })
}

/// 解析描述端点响应体
pub fn parse_description(body: &str) -> Result<DescribeResponse, PayloadError> {
  Ok(serde_json::from_str(body)?)
}
