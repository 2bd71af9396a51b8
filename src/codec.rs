// 该文件是 Yunmu （云目） 项目的一部分。
// src/codec.rs - 帧编码器
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

//! # 帧编码模块
//!
//! 将三平面 YUV 原始帧转换为旋转、缩放并压缩后的 JPEG 上传图像：
//!
//! 1. 按行列跨度重排三个平面，得到交错的 RGB 像素数据；
//! 2. 应用固定 270° 旋转（传感器安装方向校正）；
//! 3. 先按二的幂预缩，再精确缩放到目标尺寸；
//! 4. 以给定质量参数压缩为 JPEG。
//!
//! 两段式缩放限制了解码内存上限，同时不损失最终尺寸精度。

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;
use tracing::debug;

use crate::frame::{EncodedImage, Plane, RawFrame};

/// 上传图像最短边默认目标
pub const DEFAULT_TARGET_MIN_DIMENSION: u32 = 640;
/// 默认 JPEG 压缩质量
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// 帧编码错误
///
/// 只作用于单帧，不影响流水线的后续帧。
#[derive(Error, Debug)]
pub enum CodecError {
  #[error("帧尺寸无效: {width}x{height}")]
  BadDimensions { width: u32, height: u32 },
  #[error("{plane} 平面数据不足: 需要 {expected} 字节, 实际 {actual} 字节")]
  PlaneTooSmall {
    plane: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("JPEG 编码错误: {0}")]
  Jpeg(#[from] image::ImageError),
}

/// 编码一帧原始图像
///
/// `target_min_dimension` 为缩放后最短边的目标长度；
/// 最短边不超过目标时保持原尺寸。返回的 [`EncodedImage`]
/// 记录最终尺寸与实际使用的质量参数。
pub fn encode(
  frame: &RawFrame,
  target_min_dimension: u32,
  quality: u8,
) -> Result<EncodedImage, CodecError> {
  validate(frame)?;

  let rgb = repack_to_rgb(frame);
  // 固定 270° 旋转，宽高互换
  let rotated = imageops::rotate270(&rgb);

  let (rw, rh) = rotated.dimensions();
  let min_dimension = rw.min(rh);
  let scale = if min_dimension > target_min_dimension {
    target_min_dimension as f32 / min_dimension as f32
  } else {
    1.0
  };
  let target_w = (rw as f32 * scale) as u32;
  let target_h = (rh as f32 * scale) as u32;

  let scaled = if (target_w, target_h) == (rw, rh) {
    rotated
  } else {
    // 二的幂预缩之后，再做一次精确缩放
    let factor = sample_factor(rw, rh, target_w, target_h);
    let pre = if factor > 1 {
      imageops::resize(&rotated, rw / factor, rh / factor, FilterType::Nearest)
    } else {
      rotated
    };
    imageops::resize(&pre, target_w, target_h, FilterType::Triangle)
  };

  let mut jpeg = Vec::new();
  let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality);
  scaled.write_with_encoder(encoder)?;

  debug!(
    "帧编码完成: {}x{} -> {}x{}, {} 字节",
    frame.width,
    frame.height,
    target_w,
    target_h,
    jpeg.len()
  );

  Ok(EncodedImage {
    jpeg: jpeg.into_boxed_slice(),
    width: target_w,
    height: target_h,
    quality,
  })
}

fn validate(frame: &RawFrame) -> Result<(), CodecError> {
  let (w, h) = (frame.width as usize, frame.height as usize);
  if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
    return Err(CodecError::BadDimensions {
      width: frame.width,
      height: frame.height,
    });
  }

  check_plane("Y", &frame.y, h, w)?;
  check_plane("U", &frame.u, h / 2, w / 2)?;
  check_plane("V", &frame.v, h / 2, w / 2)?;
  Ok(())
}

fn check_plane(
  name: &'static str,
  plane: &Plane,
  rows: usize,
  cols: usize,
) -> Result<(), CodecError> {
  let expected = plane.required_len(rows, cols);
  if plane.data.len() < expected {
    return Err(CodecError::PlaneTooSmall {
      plane: name,
      expected,
      actual: plane.data.len(),
    });
  }
  Ok(())
}

/// 将三个平面重排为交错 RGB，色度平面按 2x2 子采样读取
fn repack_to_rgb(frame: &RawFrame) -> RgbImage {
  ImageBuffer::from_fn(frame.width, frame.height, |x, y| {
    let (row, col) = (y as usize, x as usize);
    let luma = frame.y.sample(row, col) as f32;
    let u = frame.u.sample(row / 2, col / 2) as f32 - 128.0;
    let v = frame.v.sample(row / 2, col / 2) as f32 - 128.0;

    let r = (luma + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (luma - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
    let b = (luma + 1.772 * u).clamp(0.0, 255.0) as u8;
    Rgb([r, g, b])
  })
}

/// 选择二的幂预缩因子
///
/// 预缩后的尺寸不小于目标尺寸，保证精确缩放只做收缩。
fn sample_factor(width: u32, height: u32, target_w: u32, target_h: u32) -> u32 {
  let mut factor = 1u32;
  if height > target_h || width > target_w {
    let half_w = width / 2;
    let half_h = height / 2;
    while half_h / factor >= target_h && half_w / factor >= target_w {
      factor *= 2;
    }
  }
  factor
}

#[cfg(test)]
mod tests {
  use super::*;

  fn uniform_frame(width: u32, height: u32, luma: u8) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    RawFrame {
      y: Plane::new(vec![luma; w * h], w, 1),
      u: Plane::new(vec![128u8; w * h / 4], w / 2, 1),
      v: Plane::new(vec![128u8; w * h / 4], w / 2, 1),
      width,
      height,
    }
  }

  #[test]
  fn encode_swaps_dimensions_for_rotation() {
    let frame = uniform_frame(8, 4, 96);
    let encoded = encode(&frame, 640, 85).unwrap();

    assert_eq!(encoded.width, 4);
    assert_eq!(encoded.height, 8);
    assert_eq!(encoded.quality, 85);

    let decoded = image::load_from_memory(&encoded.jpeg).unwrap();
    assert_eq!(decoded.width(), 4);
    assert_eq!(decoded.height(), 8);
  }

  #[test]
  fn encode_scales_down_to_target_min_dimension() {
    // 1920x1440 帧旋转后为 1440x1920，最短边 1440 -> 640
    let frame = uniform_frame(1920, 1440, 128);
    let encoded = encode(&frame, 640, 85).unwrap();

    let scale = 640.0f32 / 1440.0f32;
    assert_eq!(encoded.width, (1440.0f32 * scale) as u32);
    assert_eq!(encoded.height, (1920.0f32 * scale) as u32);
    // 最短边落在目标附近
    assert!(encoded.width >= 639 && encoded.width <= 641);
  }

  #[test]
  fn encode_keeps_small_frames_unscaled() {
    let frame = uniform_frame(32, 16, 128);
    let encoded = encode(&frame, 640, 85).unwrap();
    assert_eq!((encoded.width, encoded.height), (16, 32));
  }

  #[test]
  fn repack_handles_pixel_and_row_strides() {
    // 2x2 灰度帧，Y 平面行跨度 6、像素跨度 2
    let mut y_data = vec![0u8; 12];
    y_data[0] = 10;
    y_data[2] = 20;
    y_data[6] = 30;
    y_data[8] = 40;
    let frame = RawFrame {
      y: Plane::new(y_data, 6, 2),
      u: Plane::new(vec![128u8], 1, 1),
      v: Plane::new(vec![128u8], 1, 1),
      width: 2,
      height: 2,
    };

    let rgb = repack_to_rgb(&frame);
    // U/V 为 128 时各通道都等于亮度值
    assert_eq!(rgb.get_pixel(0, 0).0, [10, 10, 10]);
    assert_eq!(rgb.get_pixel(1, 0).0, [20, 20, 20]);
    assert_eq!(rgb.get_pixel(0, 1).0, [30, 30, 30]);
    assert_eq!(rgb.get_pixel(1, 1).0, [40, 40, 40]);
  }

  #[test]
  fn truncated_plane_is_rejected() {
    let mut frame = uniform_frame(8, 4, 0);
    frame.u = Plane::new(vec![128u8; 2], 4, 1);
    match encode(&frame, 640, 85) {
      Err(CodecError::PlaneTooSmall { plane, .. }) => assert_eq!(plane, "U"),
      other => panic!("意外结果: {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn odd_dimensions_are_rejected() {
    let frame = RawFrame {
      y: Plane::new(vec![0u8; 15], 5, 1),
      u: Plane::new(vec![128u8; 4], 2, 1),
      v: Plane::new(vec![128u8; 4], 2, 1),
      width: 5,
      height: 3,
    };
    assert!(matches!(
      encode(&frame, 640, 85),
      Err(CodecError::BadDimensions { .. })
    ));
  }

  #[test]
  fn sample_factor_matches_two_stage_rule() {
    // 1440x1920 -> 640x853: 半尺寸 720x960 不低于目标，预缩因子 2
    assert_eq!(sample_factor(1440, 1920, 640, 853), 2);
    // 目标大于等于原尺寸时不预缩
    assert_eq!(sample_factor(640, 640, 640, 640), 1);
    // 大幅缩小时因子按二的幂增长，预缩结果不低于目标尺寸
    assert_eq!(sample_factor(4096, 4096, 512, 512), 8);
    assert_eq!(4096 / 8, 512);
  }
}
