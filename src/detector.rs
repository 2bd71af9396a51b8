// 该文件是 Yunmu （云目） 项目的一部分。
// src/detector.rs - 检测张量解码
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

use thiserror::Error;
use tracing::debug;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 默认置信度阈值（本部署的保守调参值）
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.85;
/// 默认 NMS IOU 阈值（本部署的保守调参值）
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.8;
/// 默认锚点数量
pub const DEFAULT_NUM_ANCHORS: usize = 8400;

/// 检测结果
///
/// 坐标为模型像素空间的中心点表示。
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
  /// 边界框中心 x 坐标
  pub x: f32,
  /// 边界框中心 y 坐标
  pub y: f32,
  /// 边界框宽度
  pub w: f32,
  /// 边界框高度
  pub h: f32,
  /// 类别名称
  pub class_name: String,
  /// 置信度
  pub confidence: f32,
}

/// 一次解码产生的检测集合
///
/// 集合整体替换，从不与上一帧合并；所有条目共享同一份
/// `image_width`/`image_height` 快照。
#[derive(Clone, Debug, Default)]
pub struct DetectionSet {
  /// 按置信度降序排列的检测条目
  pub items: Vec<Detection>,
  /// 坐标所在空间的宽度
  pub image_width: f32,
  /// 坐标所在空间的高度
  pub image_height: f32,
}

/// 解码器配置错误，构造或形状校验时报告一次，不逐帧报告
#[derive(Error, Debug)]
pub enum DecoderConfigError {
  #[error("类别数量无效: {0}")]
  BadClassCount(usize),
  #[error("阈值必须位于 [0, 1]: {0}")]
  BadThreshold(f32),
  #[error("张量长度不匹配: 期望 {expected} (= {anchors} x (4 + {classes})), 实际 {actual}")]
  TensorShape {
    expected: usize,
    anchors: usize,
    classes: usize,
    actual: usize,
  },
}

/// 解码器配置
#[derive(Debug, Clone)]
pub struct DecoderConfig {
  /// 锚点数量
  pub num_anchors: usize,
  /// 类别数量
  pub num_classes: usize,
  /// 置信度阈值
  pub confidence_threshold: f32,
  /// NMS IOU 阈值
  pub iou_threshold: f32,
}

impl Default for DecoderConfig {
  fn default() -> Self {
    Self {
      num_anchors: DEFAULT_NUM_ANCHORS,
      num_classes: COCO_CLASSES.len(),
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

/// 检测张量解码器
///
/// 输入为按锚点展开的稠密张量 `[num_anchors][4 + num_classes]`：
/// 每个锚点先是四个边界框参数，之后是每个类别的置信度。
pub struct TensorDecoder {
  config: DecoderConfig,
}

impl TensorDecoder {
  /// 创建解码器，配置非法时立即报错
  pub fn new(config: DecoderConfig) -> Result<Self, DecoderConfigError> {
    if config.num_classes == 0 || config.num_classes > COCO_CLASSES.len() {
      return Err(DecoderConfigError::BadClassCount(config.num_classes));
    }
    for threshold in [config.confidence_threshold, config.iou_threshold] {
      if !(0.0..=1.0).contains(&threshold) {
        return Err(DecoderConfigError::BadThreshold(threshold));
      }
    }
    Ok(Self { config })
  }

  /// 单个锚点的条目长度
  fn stride(&self) -> usize {
    4 + self.config.num_classes
  }

  /// 期望的张量总长度
  pub fn expected_len(&self) -> usize {
    self.config.num_anchors * self.stride()
  }

  /// 解码一帧张量输出
  ///
  /// `image_width`/`image_height` 为坐标所在空间的尺寸快照。
  /// 张量长度与配置几何不符视为配置错误；没有锚点越过
  /// 置信度阈值时返回空集合而非错误。
  pub fn decode(
    &self,
    tensor: &[f32],
    image_width: f32,
    image_height: f32,
  ) -> Result<DetectionSet, DecoderConfigError> {
    if tensor.len() != self.expected_len() {
      return Err(DecoderConfigError::TensorShape {
        expected: self.expected_len(),
        anchors: self.config.num_anchors,
        classes: self.config.num_classes,
        actual: tensor.len(),
      });
    }

    let mut detections = Vec::new();
    for anchor in tensor.chunks_exact(self.stride()) {
      // 取所有类别中的最高分
      let mut max_score = 0.0f32;
      let mut max_class = 0usize;
      for (class_id, score) in anchor[4..].iter().enumerate() {
        if *score > max_score {
          max_score = *score;
          max_class = class_id;
        }
      }

      if max_score <= self.config.confidence_threshold {
        continue;
      }

      detections.push(Detection {
        x: anchor[0],
        y: anchor[1],
        w: anchor[2],
        h: anchor[3],
        class_name: COCO_CLASSES[max_class].to_string(),
        confidence: max_score,
      });
    }

    let items = self.nms(detections);
    debug!("解码完成: {} 个检测结果", items.len());

    Ok(DetectionSet {
      items,
      image_width,
      image_height,
    })
  }

  /// 非极大值抑制
  ///
  /// 仅抑制同类别且 IOU 超过阈值的低置信度检测；
  /// 等值时先被考虑的（更高置信度）一方胜出。
  fn nms(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
    // 按置信度降序排序
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let mut result = Vec::new();

    while !detections.is_empty() {
      let best = detections.remove(0);

      detections.retain(|det| {
        if det.class_name != best.class_name {
          return true;
        }
        iou(&best, det) <= self.config.iou_threshold
      });

      result.push(best);
    }

    result
  }
}

/// 计算两个边界框的 IoU，并集面积为零时定义为 0
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = (a.x - a.w / 2.0).max(b.x - b.w / 2.0);
  let y1 = (a.y - a.h / 2.0).max(b.y - b.h / 2.0);
  let x2 = (a.x + a.w / 2.0).min(b.x + b.w / 2.0);
  let y2 = (a.y + a.h / 2.0).min(b.y + b.h / 2.0);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.w * a.h + b.w * b.h - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
