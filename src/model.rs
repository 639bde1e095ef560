// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

impl DetectItem {
  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }
}

/// 各阶段耗时
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Speed {
  pub preprocess: Duration,
  pub inference: Duration,
  pub postprocess: Duration,
}

/// 单帧检测结果，坐标位于原始帧像素空间
#[derive(Debug, Clone)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
  pub labels: Arc<Labels>,
  /// 原始帧尺寸 (高, 宽)
  pub orig_shape: (u32, u32),
  pub frame_index: u64,
  pub pts_ms: Option<u64>,
  pub speed: Speed,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 按类别计数的摘要，例如 `2 person, 1 car`
  pub fn summary(&self) -> String {
    if self.items.is_empty() {
      return "(no detections)".to_string();
    }

    let mut counts: Vec<(u32, usize)> = Vec::new();
    for item in self.items.iter() {
      match counts.iter_mut().find(|(id, _)| *id == item.class_id) {
        Some((_, n)) => *n += 1,
        None => counts.push((item.class_id, 1)),
      }
    }
    counts.sort_by_key(|(id, _)| *id);

    counts
      .iter()
      .map(|(id, n)| format!("{} {}", n, self.labels.name(*id)))
      .collect::<Vec<_>>()
      .join(", ")
  }

  pub fn to_json(&self) -> serde_json::Value {
    let detections: Vec<_> = self
      .items
      .iter()
      .map(|item| {
        serde_json::json!({
          "class_id": item.class_id,
          "name": self.labels.name(item.class_id),
          "confidence": item.score,
          "box": {
            "x1": item.bbox[0],
            "y1": item.bbox[1],
            "x2": item.bbox[2],
            "y2": item.bbox[3],
          },
        })
      })
      .collect();

    serde_json::json!({
      "frame": self.frame_index,
      "pts_ms": self.pts_ms,
      "orig_shape": [self.orig_shape.0, self.orig_shape.1],
      "speed_ms": {
        "preprocess": self.speed.preprocess.as_secs_f64() * 1000.0,
        "inference": self.speed.inference.as_secs_f64() * 1000.0,
        "postprocess": self.speed.postprocess.as_secs_f64() * 1000.0,
      },
      "detections": detections,
    })
  }
}

impl fmt::Display for DetectResult {
  /// 形如 `frame 3 (640x480): 2 person, 1 car, 12.3ms`
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "frame {} ({}x{}): {}, {:.1}ms",
      self.frame_index,
      self.orig_shape.1,
      self.orig_shape.0,
      self.summary(),
      self.speed.inference.as_secs_f64() * 1000.0
    )
  }
}

/// 推理设备
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
  #[default]
  Cpu,
  Cuda(i32),
}

impl FromStr for Device {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::Cuda(0)),
      other => {
        let id = other.strip_prefix("cuda:").unwrap_or(other);
        id.parse::<i32>()
          .map(Device::Cuda)
          .map_err(|_| format!("无法识别的设备: {}", s))
      }
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "cuda:{}", id),
    }
  }
}

mod labels;
pub mod ops;
mod tensor;
mod yolo;

pub use self::labels::Labels;
pub use self::ops::{NmsConfig, RawPredictions};
pub use self::tensor::{InputTensor, Precision, TensorData};
pub use self::yolo::{Yolo, YoloBuilder, YoloError};

#[cfg(test)]
mod tests {
  use super::*;

  fn result(items: Vec<DetectItem>) -> DetectResult {
    DetectResult {
      items: items.into_boxed_slice(),
      labels: Arc::new(Labels::coco()),
      orig_shape: (480, 640),
      frame_index: 3,
      pts_ms: Some(100),
      speed: Speed::default(),
    }
  }

  fn item(class_id: u32, score: f32) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox: [1.0, 2.0, 11.0, 22.0],
    }
  }

  #[test]
  fn device_parsing() {
    assert_eq!("cpu".parse::<Device>(), Ok(Device::Cpu));
    assert_eq!("CUDA".parse::<Device>(), Ok(Device::Cuda(0)));
    assert_eq!("cuda:1".parse::<Device>(), Ok(Device::Cuda(1)));
    assert_eq!("2".parse::<Device>(), Ok(Device::Cuda(2)));
    assert!("tpu".parse::<Device>().is_err());
    assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
  }

  #[test]
  fn summary_groups_by_class() {
    let r = result(vec![item(2, 0.9), item(0, 0.8), item(0, 0.7)]);
    assert_eq!(r.summary(), "2 person, 1 car");
    assert_eq!(result(vec![]).summary(), "(no detections)");
    assert_eq!(
      result(vec![item(0, 0.8)]).to_string(),
      "frame 3 (640x480): 1 person, 0.0ms"
    );
  }

  #[test]
  fn json_carries_names_and_boxes() {
    let r = result(vec![item(0, 0.5)]);
    let json = r.to_json();
    assert_eq!(json["frame"], 3);
    assert_eq!(json["detections"][0]["name"], "person");
    assert_eq!(json["detections"][0]["box"]["x2"], 11.0);
    assert_eq!(json["orig_shape"][1], 640);
  }

  #[test]
  fn item_extent() {
    let i = item(0, 0.1);
    assert_eq!(i.width(), 10.0);
    assert_eq!(i.height(), 20.0);
  }
}
