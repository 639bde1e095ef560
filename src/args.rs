// 该文件是 Linzhi （林芝） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use linzhi::{
  PredictorConfig,
  model::{
    Device,
    ops::{DEFAULT_CONF_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_DET},
  },
  output::draw::DEFAULT_LINE_WIDTH,
};
use url::Url;

/// Linzhi 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径（由 `yolo export format=onnx` 导出）
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 输入来源
  /// 支持格式:
  /// - 图片文件或图片目录: *.jpg, *.png, ...
  /// - 视频文件: *.mp4, *.avi, *.mkv 等
  /// - 摄像头: 0 或 /dev/video0
  /// - URL: image:///a.png, gst://file/a.mp4, gst://camera/dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub source: String,

  /// 在窗口中显示标注结果
  #[arg(long)]
  pub show: bool,

  /// 输出 URL: image:///out.png, gst:///out.mp4?fps=30, folder:///dir?always
  #[arg(long, value_name = "URL")]
  pub save: Option<Url>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONF_THRESHOLD, value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 模型输入尺寸，默认使用模型声明的尺寸
  #[arg(long, value_name = "PIXELS")]
  pub imgsz: Option<u32>,

  /// 使用半精度输入
  #[arg(long)]
  pub half: bool,

  /// 推理设备: cpu, cuda, cuda:N
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Device,

  /// 每张图片最多保留的检测数
  #[arg(long, default_value_t = DEFAULT_MAX_DET, value_name = "COUNT")]
  pub max_det: usize,

  /// 只保留这些类别编号，例如 0,2
  #[arg(long, value_delimiter = ',', value_name = "IDS")]
  pub classes: Option<Vec<u32>>,

  /// 不区分类别进行 NMS
  #[arg(long)]
  pub agnostic_nms: bool,

  /// 类别名称文件，每行一个
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 检测框线宽
  #[arg(long, default_value_t = DEFAULT_LINE_WIDTH, value_name = "PIXELS")]
  pub line_width: u32,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<usize>,

  /// 以 JSON Lines 格式输出每帧结果
  #[arg(long)]
  pub json: bool,
}

impl From<&Args> for PredictorConfig {
  fn from(args: &Args) -> Self {
    PredictorConfig {
      model: args.model.clone(),
      source: args.source.clone(),
      show: args.show,
      save: args.save.clone(),
      conf_threshold: args.conf,
      iou_threshold: args.iou,
      imgsz: args.imgsz,
      half: args.half,
      device: args.device,
      max_det: args.max_det,
      classes: args.classes.clone(),
      agnostic_nms: args.agnostic_nms,
      labels: args.labels.clone(),
      line_width: args.line_width,
      max_frames: args.max_frames,
      intra_threads: None,
    }
  }
}
