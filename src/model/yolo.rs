// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model/yolo.rs - YOLO 检测模型（ONNX Runtime）
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

use std::{
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
  time::Instant,
};

use half::f16;
use ort::{
  execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch},
  session::{Session, builder::GraphOptimizationLevel},
  tensor::TensorElementType,
  value::ValueType,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbNhwcFrame},
  model::{
    DetectItem, DetectResult, Device, Labels, Model, NmsConfig, RawPredictions, Speed,
    ops,
    tensor::{InputTensor, Precision},
  },
};

const YOLO_NUM_INPUTS: usize = 1;
const YOLO_INPUT_RANK: usize = 4;
const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_NAMES_METADATA_KEY: &str = "names";

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型文件不存在: {}", .0.display())]
  ModelNotFound(PathBuf),
  #[error("不支持的模型格式: {}，请先导出为 ONNX（yolo export model=<权重> format=onnx）", .0.display())]
  UnsupportedFormat(PathBuf),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("推理设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("输入帧错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理会话已失效")]
  SessionPoisoned,
  #[error("后处理失败: {0}")]
  BatchMismatch(#[from] ops::BatchMismatch),
}

impl YoloError {
  pub fn invalid(msg: impl Into<String>) -> Self {
    YoloError::ModelInvalid(msg.into())
  }
}

pub struct YoloBuilder {
  model_path: PathBuf,
  device: Device,
  half: bool,
  input_size: Option<u32>,
  intra_threads: Option<usize>,
  labels: Option<Labels>,
  nms: NmsConfig,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = YoloBuilder::new(crate::url_path(url));
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "device" => {
          builder.device = v.parse().map_err(YoloError::ModelPathError)?;
        }
        "half" => builder.half = v != "false" && v != "0",
        "imgsz" => {
          builder.input_size = Some(
            v.parse()
              .map_err(|_| YoloError::ModelPathError(format!("无效的输入尺寸: {}", v)))?,
          );
        }
        _ => warn!("忽略未知的模型参数: {}={}", k, v),
      }
    }
    Ok(builder)
  }
}

impl YoloBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    YoloBuilder {
      model_path: model_path.into(),
      device: Device::default(),
      half: false,
      input_size: None,
      intra_threads: None,
      labels: None,
      nms: NmsConfig::default(),
    }
  }

  pub fn device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn half(mut self, half: bool) -> Self {
    self.half = half;
    self
  }

  pub fn input_size(mut self, size: Option<u32>) -> Self {
    self.input_size = size;
    self
  }

  pub fn intra_threads(mut self, threads: Option<usize>) -> Self {
    self.intra_threads = threads;
    self
  }

  /// 覆盖模型元数据中的类别名称
  pub fn labels(mut self, labels: Option<Labels>) -> Self {
    self.labels = labels;
    self
  }

  pub fn nms(mut self, nms: NmsConfig) -> Self {
    self.nms = nms;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(YoloError::ModelNotFound(self.model_path));
    }
    if self
      .model_path
      .extension()
      .is_some_and(|ext| ext.eq_ignore_ascii_case("pt"))
    {
      return Err(YoloError::UnsupportedFormat(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    debug!(
      "模型文件大小: {:.2} MB",
      std::fs::metadata(&self.model_path)
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or_default()
    );

    info!("创建 ONNX Runtime 推理会话，设备: {}", self.device);
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads)?;
    }
    builder = builder.with_execution_providers([execution_provider(self.device)?])?;
    let session = builder.commit_from_file(&self.model_path)?;
    info!("模型加载完成");

    if session.inputs.len() != YOLO_NUM_INPUTS || session.outputs.is_empty() {
      error!(
        "预期模型输入数量为 {}, 实际为 {}; 输出数量为 {}",
        YOLO_NUM_INPUTS,
        session.inputs.len(),
        session.outputs.len()
      );
      return Err(YoloError::invalid(format!(
        "预期 {} 个输入与至少 1 个输出, 实际为 {} 个输入与 {} 个输出",
        YOLO_NUM_INPUTS,
        session.inputs.len(),
        session.outputs.len()
      )));
    }

    let input = &session.inputs[0];
    let (input_type, input_dims) = match &input.input_type {
      ValueType::Tensor { ty, shape, .. } => (*ty, shape.to_vec()),
      other => {
        return Err(YoloError::invalid(format!("模型输入不是张量: {:?}", other)));
      }
    };
    if input_dims.len() != YOLO_INPUT_RANK {
      return Err(YoloError::invalid(format!(
        "预期模型输入维度为 {}, 实际为 {:?}",
        YOLO_INPUT_RANK, input_dims
      )));
    }

    let output = &session.outputs[0];
    let output_type = match &output.output_type {
      ValueType::Tensor { ty, .. } => *ty,
      other => {
        return Err(YoloError::invalid(format!("模型输出不是张量: {:?}", other)));
      }
    };

    let precision = match input_type {
      TensorElementType::Float16 => Precision::Half,
      TensorElementType::Float32 if self.half => {
        warn!("模型输入为 float32，忽略半精度设置");
        Precision::Full
      }
      TensorElementType::Float32 => Precision::Full,
      other => {
        return Err(YoloError::invalid(format!("不支持的输入类型: {:?}", other)));
      }
    };
    if !matches!(
      output_type,
      TensorElementType::Float32 | TensorElementType::Float16
    ) {
      return Err(YoloError::invalid(format!(
        "不支持的输出类型: {:?}",
        output_type
      )));
    }

    let input_size = resolve_input_size(&input_dims, self.input_size);
    debug!("模型输入: {} {:?} -> {:?}", input.name, input_dims, input_size);
    debug!("模型输出: {} {:?}", output.name, output_type);

    let labels = match self.labels {
      Some(labels) => labels,
      None => {
        let names = session
          .metadata()
          .and_then(|meta| meta.custom(YOLO_NAMES_METADATA_KEY))
          .ok()
          .flatten();
        match names.as_deref().and_then(Labels::from_metadata) {
          Some(labels) => labels,
          None => {
            warn!("模型元数据中没有类别名称，使用 COCO 类别");
            Labels::coco()
          }
        }
      }
    };
    info!("类别数量: {}", labels.len());

    Ok(Yolo {
      input_name: input.name.clone(),
      output_name: output.name.clone(),
      output_type,
      input_size,
      precision,
      labels: Arc::new(labels),
      nms: self.nms,
      session: Mutex::new(session),
    })
  }
}

fn execution_provider(device: Device) -> Result<ExecutionProviderDispatch, YoloError> {
  match device {
    Device::Cpu => Ok(CPUExecutionProvider::default().build().error_on_failure()),
    #[cfg(feature = "cuda")]
    Device::Cuda(id) => Ok(
      ort::execution_providers::CUDAExecutionProvider::default()
        .with_device_id(id)
        .build()
        .error_on_failure(),
    ),
    #[cfg(not(feature = "cuda"))]
    Device::Cuda(id) => Err(YoloError::DeviceUnavailable(format!(
      "cuda:{} (未启用 cuda 特性)",
      id
    ))),
  }
}

/// 模型输入为 `[N, 3, H, W]`，动态维度或显式指定时使用 `override_size`
fn resolve_input_size(dims: &[i64], override_size: Option<u32>) -> (u32, u32) {
  if let Some(size) = override_size {
    return (size, size);
  }
  let h = dims.get(2).copied().filter(|d| *d > 0);
  let w = dims.get(3).copied().filter(|d| *d > 0);
  match (h, w) {
    (Some(h), Some(w)) => (h as u32, w as u32),
    _ => (YOLO_DEFAULT_INPUT_SIZE, YOLO_DEFAULT_INPUT_SIZE),
  }
}

/// 加载后的 YOLO 检测模型
///
/// 会话在构造时创建，此后只读共享；推理通过互斥锁串行执行。
pub struct Yolo {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  output_type: TensorElementType,
  input_size: (u32, u32),
  precision: Precision,
  labels: Arc<Labels>,
  nms: NmsConfig,
}

impl Yolo {
  pub fn labels(&self) -> &Arc<Labels> {
    &self.labels
  }

  pub fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  pub fn precision(&self) -> Precision {
    self.precision
  }

  pub fn nms_config(&self) -> &NmsConfig {
    &self.nms
  }

  pub fn preprocess(&self, frames: &[&RgbNhwcFrame]) -> Result<InputTensor, YoloError> {
    Ok(InputTensor::from_frames(
      frames,
      self.input_size,
      self.precision,
    )?)
  }

  pub fn forward(&self, tensor: &InputTensor) -> Result<RawPredictions, YoloError> {
    let value = tensor.to_value()?;
    let mut session = self.session.lock().map_err(|_| YoloError::SessionPoisoned)?;

    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![self.input_name.as_str() => value])?;
    let output = &outputs[self.output_name.as_str()];

    let (shape, data): (Vec<i64>, Vec<f32>) = match self.output_type {
      TensorElementType::Float16 => {
        let (shape, data) = output.try_extract_tensor::<f16>()?;
        (shape.to_vec(), data.iter().map(|v| v.to_f32()).collect())
      }
      _ => {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        (shape.to_vec(), data.to_vec())
      }
    };
    debug!("模型输出形状: {:?}", shape);

    let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();
    RawPredictions::new(&dims, data)
      .ok_or_else(|| YoloError::invalid(format!("无法解析模型输出形状: {:?}", shape)))
  }

  pub fn postprocess(
    &self,
    raw: &RawPredictions,
    tensor: &InputTensor,
    frames: &[&RgbNhwcFrame],
  ) -> Result<Vec<Vec<DetectItem>>, YoloError> {
    let shapes: Vec<(u32, u32)> = frames.iter().map(|f| f.shape()).collect();
    Ok(ops::postprocess(raw, tensor.letterbox(), &shapes, &self.nms)?)
  }
}

impl Model for Yolo {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let start = Instant::now();
    let tensor = self.preprocess(&[input])?;
    let preprocessed = Instant::now();

    let raw = self.forward(&tensor)?;
    let inferred = Instant::now();

    let items = self
      .postprocess(&raw, &tensor, &[input])?
      .into_iter()
      .next()
      .unwrap_or_default();
    let done = Instant::now();
    drop(tensor);

    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
      labels: Arc::clone(&self.labels),
      orig_shape: input.shape(),
      frame_index: input.index(),
      pts_ms: input.pts_ms(),
      speed: Speed {
        preprocess: preprocessed - start,
        inference: inferred - preprocessed,
        postprocess: done - inferred,
      },
    })
  }
}
