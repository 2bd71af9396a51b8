// 该文件是 Yunmu （云目） 项目的一部分。
// src/frame.rs - 原始帧与编码图像定义
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

/// 单个图像平面
///
/// `data` 的布局由 `row_stride` 与 `pixel_stride` 决定，
/// 两者均以字节计，允许行尾填充与采样间隔。
#[derive(Debug, Clone)]
pub struct Plane {
  pub data: Box<[u8]>,
  pub row_stride: usize,
  pub pixel_stride: usize,
}

impl Plane {
  pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data: data.into_boxed_slice(),
      row_stride,
      pixel_stride,
    }
  }

  /// 按行列读取一个采样值
  #[inline]
  pub fn sample(&self, row: usize, col: usize) -> u8 {
    self.data[row * self.row_stride + col * self.pixel_stride]
  }

  /// 覆盖 `rows` x `cols` 个采样所需的最小字节数
  pub fn required_len(&self, rows: usize, cols: usize) -> usize {
    if rows == 0 || cols == 0 {
      return 0;
    }
    (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
  }
}

/// 三平面 YUV 4:2:0 原始帧
///
/// 帧在流水线各阶段之间以移动方式传递，任一时刻只被一个阶段持有；
/// 持有者在所有退出路径上恰好释放一次。
#[derive(Debug)]
pub struct RawFrame {
  pub y: Plane,
  pub u: Plane,
  pub v: Plane,
  pub width: u32,
  pub height: u32,
}

/// 编码后的上传图像
///
/// 每次调度产生一份，由通道消费一次后丢弃。
/// `width`/`height` 为旋转与缩放之后的最终尺寸，
/// `quality` 记录实际使用的压缩质量参数。
#[derive(Debug, Clone)]
pub struct EncodedImage {
  pub jpeg: Box<[u8]>,
  pub width: u32,
  pub height: u32,
  pub quality: u8,
}
