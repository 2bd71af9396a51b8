// 该文件是 Yunmu （云目） 项目的一部分。
// src/project.rs - 视图投影
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

//! # 视图投影模块
//!
//! 把模型像素空间（方形 letterbox 画布）中的检测框映射到
//! 校准后的屏幕坐标，分两段：
//!
//! 1. 还原 letterbox：去除方形画布的填充，归一化后放大到视口。
//!    `scaled_width`/`scaled_height` 相对视口宽高做了轴交换，
//!    补偿传感器的固定旋转。
//! 2. 用户校准：围绕视口中心缩放再平移，X/Y 互相独立。
//!
//! 投影矩形与视口相交才可见；交付给叠加层之前边缘裁剪到视口内，
//! 标签锚点避开上边与侧边的裁剪。

use crate::detector::DetectionSet;

// 标签文本度量（粗略估计）
const LABEL_CHAR_WIDTH: f32 = 8.0;
const LABEL_TEXT_HEIGHT: f32 = 16.0;

/// 固定仿射校准参数，启动时配置，运行期只读
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
  pub scale_x: f32,
  pub scale_y: f32,
  pub offset_x: f32,
  pub offset_y: f32,
}

impl Default for Calibration {
  fn default() -> Self {
    Self {
      scale_x: 3.5,
      scale_y: 3.5,
      offset_x: 180.0,
      offset_y: 100.0,
    }
  }
}

/// 目标视口（像素）
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
  pub width: f32,
  pub height: f32,
}

/// 屏幕空间矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl Rect {
  fn clamp_to(&self, viewport: Viewport) -> Rect {
    Rect {
      left: self.left.clamp(0.0, viewport.width),
      top: self.top.clamp(0.0, viewport.height),
      right: self.right.clamp(0.0, viewport.width),
      bottom: self.bottom.clamp(0.0, viewport.height),
    }
  }

  fn intersects(&self, viewport: Viewport) -> bool {
    self.right > 0.0 && self.left < viewport.width && self.bottom > 0.0 && self.top < viewport.height
  }
}

/// 投影后的屏幕框
#[derive(Debug, Clone)]
pub struct ProjectedBox {
  /// 校准后的屏幕坐标（未裁剪）
  pub screen: Rect,
  /// 裁剪到视口内的边
  pub clipped: Rect,
  /// 标签文本，如 `person 93%`
  pub label: String,
  /// 标签锚点
  pub label_x: f32,
  pub label_y: f32,
  pub class_name: String,
  pub confidence: f32,
}

/// 视图投影器
pub struct ViewProjector {
  calibration: Calibration,
  label_char_width: f32,
  label_text_height: f32,
}

impl ViewProjector {
  pub fn new(calibration: Calibration) -> Self {
    Self {
      calibration,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_height: LABEL_TEXT_HEIGHT,
    }
  }

  /// 投影一组检测结果，只返回可见的框
  pub fn project(&self, set: &DetectionSet, viewport: Viewport) -> Vec<ProjectedBox> {
    let (vw, vh) = (viewport.width, viewport.height);
    if set.items.is_empty() || vw <= 0.0 || vh <= 0.0 {
      return Vec::new();
    }

    let center_x = vw / 2.0;
    let center_y = vh / 2.0;

    // 计算 letterbox 参数，宽高相对视口做了轴交换
    let model_size = set.image_width;
    let scale = model_size / vw.max(vh);
    let scaled_width = vh * scale;
    let scaled_height = vw * scale;
    let pad_x = (model_size - scaled_width) / 2.0;
    let pad_y = (model_size - scaled_height) / 2.0;

    let mut boxes = Vec::with_capacity(set.items.len());
    for detection in &set.items {
      // 去除 letterbox 填充
      let x_in_scaled = detection.x - pad_x;
      let y_in_scaled = detection.y - pad_y;

      // 归一化坐标 -> 视口坐标
      let vcx = x_in_scaled / scaled_width * vw;
      let vcy = y_in_scaled / scaled_height * vh;
      let vbw = detection.w / scaled_width * vw;
      let vbh = detection.h / scaled_height * vh;

      let base = Rect {
        left: vcx - vbw / 2.0,
        top: vcy - vbh / 2.0,
        right: vcx + vbw / 2.0,
        bottom: vcy + vbh / 2.0,
      };

      // 应用用户缩放和位移（围绕视口中心）
      let screen = Rect {
        left: (base.left - center_x) * self.calibration.scale_x + center_x + self.calibration.offset_x,
        top: (base.top - center_y) * self.calibration.scale_y + center_y + self.calibration.offset_y,
        right: (base.right - center_x) * self.calibration.scale_x
          + center_x
          + self.calibration.offset_x,
        bottom: (base.bottom - center_y) * self.calibration.scale_y
          + center_y
          + self.calibration.offset_y,
      };

      if !screen.intersects(viewport) {
        continue;
      }

      let clipped = screen.clamp_to(viewport);
      let label = format!(
        "{} {}%",
        detection.class_name,
        (detection.confidence * 100.0) as i32
      );
      let (label_x, label_y) = self.place_label(&label, clipped, viewport);

      boxes.push(ProjectedBox {
        screen,
        clipped,
        label,
        label_x,
        label_y,
        class_name: detection.class_name.clone(),
        confidence: detection.confidence,
      });
    }

    boxes
  }

  /// 放置标签锚点，避免越过视口上边与侧边
  fn place_label(&self, label: &str, clipped: Rect, viewport: Viewport) -> (f32, f32) {
    let text_width = label.chars().count() as f32 * self.label_char_width;
    let text_height = self.label_text_height;

    let max_x = (viewport.width - text_width - 8.0).max(0.0);
    let label_x = (clipped.left + 4.0).clamp(0.0, max_x);

    // 贴近上边时放到框内下方
    let label_y = if clipped.top - 4.0 < text_height + 4.0 {
      clipped.top + text_height + 8.0
    } else {
      clipped.top - 4.0
    };

    (label_x, label_y)
  }
}
