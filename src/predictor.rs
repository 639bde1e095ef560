// 该文件是 Linzhi （林芝） 项目的一部分。
// src/predictor.rs - 推理封装
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

//! # 推理封装
//!
//! [`Predictor`] 持有加载后的检测模型，提供逐步调用的
//! `preprocess` → `forward` → `postprocess` → `annotate`，
//! 以及从来源读取全部帧的 [`Predictor::predict`]。两者走同一条推理路径。
//!
//! ```no_run
//! use linzhi::{PredictorConfig, Predictor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let predictor = Predictor::new(PredictorConfig::new("best.onnx", "video.mp4"))?;
//! for result in predictor.predict("video.mp4", true)? {
//!     println!("{}", result);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::{
  config::PredictorConfig,
  error::PredictError,
  frame::RgbNhwcFrame,
  input::InputWrapper,
  model::{DetectItem, DetectResult, InputTensor, Labels, RawPredictions, Yolo, YoloBuilder},
  output::{OutputWrapper, Outputs, draw::Draw},
  task::{ContinuousTask, OneShotTask, Task},
};

pub struct Predictor {
  model: Yolo,
  draw: Arc<Draw>,
  config: PredictorConfig,
}

impl Predictor {
  /// 加载模型；模型或类别文件不存在时返回缺失文件类错误
  pub fn new(config: PredictorConfig) -> Result<Self, PredictError> {
    let labels = match &config.labels {
      Some(path) => Some(Labels::from_file(path).map_err(|source| PredictError::Labels {
        path: path.clone(),
        source,
      })?),
      None => None,
    };

    info!("加载模型: {}", config.model.display());
    let model = YoloBuilder::new(&config.model)
      .device(config.device)
      .half(config.half)
      .input_size(config.imgsz)
      .intra_threads(config.intra_threads)
      .labels(labels)
      .nms(config.nms_config())
      .build()?;

    let draw = Arc::new(Draw::new()?.with_line_width(config.line_width));

    Ok(Self {
      model,
      draw,
      config,
    })
  }

  pub fn model(&self) -> &Yolo {
    &self.model
  }

  pub fn config(&self) -> &PredictorConfig {
    &self.config
  }

  pub fn labels(&self) -> &Labels {
    self.model.labels()
  }

  /// 信箱缩放、归一化并转换为模型精度的 NCHW 张量
  pub fn preprocess(&self, frame: &RgbNhwcFrame) -> Result<InputTensor, PredictError> {
    self.preprocess_batch(&[frame])
  }

  pub fn preprocess_batch(&self, frames: &[&RgbNhwcFrame]) -> Result<InputTensor, PredictError> {
    Ok(self.model.preprocess(frames)?)
  }

  pub fn forward(&self, tensor: &InputTensor) -> Result<RawPredictions, PredictError> {
    Ok(self.model.forward(tensor)?)
  }

  /// 置信度过滤、非极大值抑制，并按预处理时的信箱参数把框缩放回各原始帧
  ///
  /// 每个输入帧对应一个列表，顺序与输入一致；批次大小不一致时返回错误。
  pub fn postprocess(
    &self,
    raw: &RawPredictions,
    tensor: &InputTensor,
    frames: &[&RgbNhwcFrame],
  ) -> Result<Vec<Vec<DetectItem>>, PredictError> {
    Ok(self.model.postprocess(raw, tensor, frames)?)
  }

  /// 在帧的副本上绘制检测框与标签
  pub fn annotate(
    &self,
    frame: &RgbNhwcFrame,
    items: &[DetectItem],
  ) -> Result<RgbNhwcFrame, PredictError> {
    Ok(self.draw.annotate(frame, items, self.model.labels())?)
  }

  /// 读取来源中的全部帧进行检测，按帧顺序返回结果
  pub fn predict(&self, source: &str, show: bool) -> Result<Vec<DetectResult>, PredictError> {
    let input = InputWrapper::from_source(source)?;

    let mut outputs = Outputs::new();
    if show {
      outputs.push(OutputWrapper::display(self.draw.clone())?);
    }
    if let Some(url) = &self.config.save {
      info!("输出到: {}", url);
      outputs.push(OutputWrapper::from_url_with_draw(url, self.draw.clone())?);
    }

    let frames = input.into_nhwc();
    let results = if self.config.max_frames == Some(1) {
      OneShotTask.run_task(frames, &self.model, &outputs)?
    } else {
      ContinuousTask::default()
        .with_frame_number(self.config.max_frames)
        .run_task(frames, &self.model, &outputs)?
    };
    Ok(results)
  }
}

/// 按配置加载模型并处理配置中的来源
pub fn run(config: PredictorConfig) -> Result<Vec<DetectResult>, PredictError> {
  let source = config.source.clone();
  let show = config.show;
  let predictor = Predictor::new(config)?;
  predictor.predict(&source, show)
}
