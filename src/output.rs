// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output.rs - 输出定义
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

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::DetectResult,
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;
use self::draw::{Draw, DrawError};

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display_output::GStreamerDisplayOutput;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, RecordMode};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("不支持的输出: {0}")]
  Unsupported(String),
}

pub enum OutputWrapper {
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideoOutput(GStreamerVideoOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Self::from_url_with_draw(url, Arc::new(Draw::new()?))
  }
}

impl OutputWrapper {
  /// 按 URL scheme 创建输出，所有输出共用同一个绘制器
  pub fn from_url_with_draw(url: &Url, draw: Arc<Draw>) -> Result<Self, OutputError> {
    match url.scheme() {
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?.with_draw(draw);
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "gstreamer_output")]
      GStreamerVideoOutput::SCHEME => {
        let output = GStreamerVideoOutput::from_url(url)?.with_draw(draw);
        Ok(OutputWrapper::GStreamerVideoOutput(output))
      }
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::SCHEME => Ok(OutputWrapper::GStreamerDisplayOutput(
        GStreamerDisplayOutput::new(draw),
      )),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?.with_draw(draw);
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }

  /// 实时显示窗口
  #[cfg(feature = "gstreamer_output")]
  pub fn display(draw: Arc<Draw>) -> Result<Self, OutputError> {
    Ok(OutputWrapper::GStreamerDisplayOutput(
      GStreamerDisplayOutput::new(draw),
    ))
  }

  #[cfg(not(feature = "gstreamer_output"))]
  pub fn display(_draw: Arc<Draw>) -> Result<Self, OutputError> {
    Err(OutputError::Unsupported(
      "显示窗口 (未启用 gstreamer_output 特性)".to_string(),
    ))
  }
}

impl Render<RgbNhwcFrame, DetectResult> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbNhwcFrame, result: &DetectResult) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

/// 依次写入多个输出，没有输出时什么也不做
#[derive(Default)]
pub struct Outputs {
  outputs: Vec<OutputWrapper>,
}

impl Outputs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, output: OutputWrapper) {
    self.outputs.push(output);
  }

  pub fn len(&self) -> usize {
    self.outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }
}

impl Render<RgbNhwcFrame, DetectResult> for Outputs {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbNhwcFrame, result: &DetectResult) -> Result<(), Self::Error> {
    for output in &self.outputs {
      output.render_result(frame, result)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/out").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }

  #[test]
  fn outputs_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let draw = Arc::new(Draw::new().unwrap());
    let mut outputs = Outputs::new();
    assert!(outputs.is_empty());
    for name in ["a.png", "b.png"] {
      let url = Url::parse(&format!("image://{}/{}", dir.path().display(), name)).unwrap();
      outputs.push(OutputWrapper::from_url_with_draw(&url, draw.clone()).unwrap());
    }
    assert_eq!(outputs.len(), 2);

    let frame = RgbNhwcFrame::from(image::RgbImage::new(8, 8));
    let result = DetectResult {
      items: Box::new([]),
      labels: Arc::new(crate::model::Labels::coco()),
      orig_shape: (8, 8),
      frame_index: 0,
      pts_ms: None,
      speed: Default::default(),
    };
    outputs.render_result(&frame, &result).unwrap();
    assert!(dir.path().join("a.png").exists());
    assert!(dir.path().join("b.png").exists());
  }
}
