// 该文件是 Linzhi （林芝） 项目的一部分。
// src/config.rs - 推理配置
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

use std::path::PathBuf;

use url::Url;

use crate::{
  model::{
    Device, NmsConfig,
    ops::{DEFAULT_CONF_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_DET},
  },
  output::draw::DEFAULT_LINE_WIDTH,
};

/// 推理配置
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
  /// ONNX 模型文件
  pub model: PathBuf,
  /// 输入来源：图片、图片目录、视频文件、摄像头编号或 URL
  pub source: String,
  /// 是否在窗口中显示标注结果
  pub show: bool,
  /// 结果输出 URL（`image://`、`gst://`、`folder://`）
  pub save: Option<Url>,
  pub conf_threshold: f32,
  pub iou_threshold: f32,
  /// 覆盖模型输入尺寸
  pub imgsz: Option<u32>,
  pub half: bool,
  pub device: Device,
  pub max_det: usize,
  /// 只保留这些类别
  pub classes: Option<Vec<u32>>,
  pub agnostic_nms: bool,
  /// 类别名称文件，每行一个
  pub labels: Option<PathBuf>,
  pub line_width: u32,
  /// 最多处理的帧数
  pub max_frames: Option<usize>,
  pub intra_threads: Option<usize>,
}

impl Default for PredictorConfig {
  fn default() -> Self {
    Self {
      model: PathBuf::from("best.onnx"),
      source: String::from("video.mp4"),
      show: false,
      save: None,
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      imgsz: None,
      half: false,
      device: Device::Cpu,
      max_det: DEFAULT_MAX_DET,
      classes: None,
      agnostic_nms: false,
      labels: None,
      line_width: DEFAULT_LINE_WIDTH,
      max_frames: None,
      intra_threads: None,
    }
  }
}

impl PredictorConfig {
  pub fn new(model: impl Into<PathBuf>, source: impl Into<String>) -> Self {
    Self {
      model: model.into(),
      source: source.into(),
      ..Self::default()
    }
  }

  pub fn nms_config(&self) -> NmsConfig {
    NmsConfig {
      conf_threshold: self.conf_threshold,
      iou_threshold: self.iou_threshold,
      max_det: self.max_det,
      classes: self.classes.clone(),
      agnostic: self.agnostic_nms,
    }
  }
}
