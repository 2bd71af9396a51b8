// 该文件是 Yunmu （云目） 项目的一部分。
// src/record.rs - 目录记录输出
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

//! 调试记录输出：按日期分层目录保存上传的 JPEG 与检测结果侧录，
//! 用于离线校准与排查。

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Datelike, Utc};
use thiserror::Error;

use crate::detector::DetectionSet;
use crate::frame::EncodedImage;

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 目录记录输出
pub struct DirectoryRecord {
  directory: PathBuf,
  frame_counter: Mutex<u16>,
  /// 为真时空结果也记录
  always: bool,
}

impl DirectoryRecord {
  pub fn new(directory: impl Into<PathBuf>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: Mutex::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self.frame_counter.lock().unwrap();
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn frame_path(&self) -> Result<PathBuf, RecordError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.jpg",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  /// 保存一次上传的图像与检测结果
  ///
  /// JPEG 原样落盘，检测条目写入同名 txt 侧录：
  /// `类别, 置信度, x, y, w, h`（模型像素空间）。
  pub fn save(&self, image: &EncodedImage, result: &DetectionSet) -> Result<(), RecordError> {
    if !self.always && result.items.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    std::fs::write(&path, &image.jpeg)?;

    let mut records = Vec::with_capacity(result.items.len());
    for item in &result.items {
      records.push(format!(
        "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
        item.class_name, item.confidence, item.x, item.y, item.w, item.h
      ));
    }
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::Detection;

  fn encoded() -> EncodedImage {
    EncodedImage {
      jpeg: vec![0xff, 0xd8, 0xff, 0xd9].into_boxed_slice(),
      width: 4,
      height: 4,
      quality: 85,
    }
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = std::env::temp_dir().join("yunmu-record-empty");
    let _ = std::fs::remove_dir_all(&dir);

    let record = DirectoryRecord::new(&dir, false);
    record.save(&encoded(), &DetectionSet::default()).unwrap();
    assert!(!dir.exists());

    let record = DirectoryRecord::new(&dir, true);
    record.save(&encoded(), &DetectionSet::default()).unwrap();
    assert!(dir.exists());

    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn detections_produce_jpeg_and_sidecar() {
    let dir = std::env::temp_dir().join("yunmu-record-save");
    let _ = std::fs::remove_dir_all(&dir);

    let record = DirectoryRecord::new(&dir, false);
    let set = DetectionSet {
      items: vec![Detection {
        x: 320.0,
        y: 320.0,
        w: 100.0,
        h: 100.0,
        class_name: "person".to_string(),
        confidence: 0.9,
      }],
      image_width: 640.0,
      image_height: 640.0,
    };
    record.save(&encoded(), &set).unwrap();

    let mut jpgs = Vec::new();
    let mut txts = Vec::new();
    for entry in walk(&dir) {
      match entry.extension().and_then(|e| e.to_str()) {
        Some("jpg") => jpgs.push(entry),
        Some("txt") => txts.push(entry),
        _ => {}
      }
    }
    assert_eq!(jpgs.len(), 1);
    assert_eq!(txts.len(), 1);

    let sidecar = std::fs::read_to_string(&txts[0]).unwrap();
    assert!(sidecar.starts_with("person, 0.9000"));

    let _ = std::fs::remove_dir_all(&dir);
  }

  fn walk(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
      for entry in std::fs::read_dir(&current).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files
  }
}
