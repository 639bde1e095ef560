// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, is_image_path};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Input not found: {}", .0.display())]
  NotFound(PathBuf),
  #[error("Unsupported input source: {0}")]
  UnsupportedSource(String),
}

impl InputError {
  /// 输入文件不存在
  pub fn is_not_found(&self) -> bool {
    match self {
      InputError::NotFound(_) => true,
      InputError::ImageFileInputError(e) => e.is_not_found(),
      #[cfg(feature = "gstreamer_input")]
      InputError::GStreamerInputError(e) => e.is_not_found(),
      _ => false,
    }
  }
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }

    if url.scheme() == ImageFileInput::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }
    Err(InputError::SchemeMismatch)
  }
}

fn is_known_scheme(scheme: &str) -> bool {
  #[cfg(feature = "gstreamer_input")]
  {
    if scheme == GStreamerInputPipelineBuilder::SCHEME {
      return true;
    }
  }
  scheme == ImageFileInput::SCHEME
}

/// 摄像头设备：纯数字编号或 `/dev/video*`
fn camera_device(source: &str) -> Option<String> {
  if !source.is_empty() && source.chars().all(|c| c.is_ascii_digit()) {
    return Some(format!("/dev/video{}", source));
  }
  source
    .starts_with("/dev/video")
    .then(|| source.to_string())
}

impl InputWrapper {
  /// 从来源字符串创建输入
  ///
  /// 支持 `image://` 与 `gst://` URL、摄像头编号、`/dev/video*`、
  /// 图片文件或图片目录，其余存在的路径按视频文件处理。
  pub fn from_source(source: &str) -> Result<Self, InputError> {
    if let Ok(url) = Url::parse(source)
      && is_known_scheme(url.scheme())
    {
      return Self::from_url(&url);
    }

    if let Some(device) = camera_device(source) {
      return Self::camera(&device);
    }

    let path = Path::new(source);
    if !path.exists() {
      return Err(InputError::NotFound(path.to_path_buf()));
    }

    if path.is_dir() || is_image_path(path) {
      info!("图片输入: {}", path.display());
      return Ok(InputWrapper::ReadImageFile(ImageFileInput::open(path)?));
    }

    Self::video_file(path)
  }

  #[cfg(feature = "gstreamer_input")]
  fn camera(device: &str) -> Result<Self, InputError> {
    info!("摄像头输入: {}", device);
    let input = GStreamerInputPipelineBuilder::new().camera(device).build()?;
    Ok(InputWrapper::GStreamerInput(input))
  }

  #[cfg(not(feature = "gstreamer_input"))]
  fn camera(device: &str) -> Result<Self, InputError> {
    Err(InputError::UnsupportedSource(format!(
      "{} (未启用 gstreamer_input 特性)",
      device
    )))
  }

  #[cfg(feature = "gstreamer_input")]
  fn video_file(path: &Path) -> Result<Self, InputError> {
    info!("视频输入: {}", path.display());
    let input = GStreamerInputPipelineBuilder::new()
      .file(&path.to_string_lossy())
      .build()?;
    Ok(InputWrapper::GStreamerInput(input))
  }

  #[cfg(not(feature = "gstreamer_input"))]
  fn video_file(path: &Path) -> Result<Self, InputError> {
    Err(InputError::UnsupportedSource(format!(
      "{} (未启用 gstreamer_input 特性)",
      path.display()
    )))
  }

  /// 是否为连续的视频流（视频文件或摄像头）
  pub fn is_stream(&self) -> bool {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(_) => true,
      InputWrapper::ReadImageFile(_) => false,
    }
  }

  pub fn into_nhwc(self) -> InputWrapperNhwcIter {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => InputWrapperNhwcIter::GStreamerInput(input),
      InputWrapper::ReadImageFile(input) => InputWrapperNhwcIter::ReadImageFile(input),
    }
  }
}

pub enum InputWrapperNhwcIter {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  ReadImageFile(ImageFileInput),
}

/// 逐帧读取；读取失败时产出一次错误，随后结束
impl Iterator for InputWrapperNhwcIter {
  type Item = Result<RgbNhwcFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapperNhwcIter::GStreamerInput(input) => input.next().map(|r| r.map_err(Into::into)),
      InputWrapperNhwcIter::ReadImageFile(input) => input.next().map(|r| r.map_err(Into::into)),
    }
  }
}
