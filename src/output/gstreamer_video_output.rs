// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的视频帧编码保存为视频文件，画面尺寸取自第一帧。
//!
//! ## 支持的格式
//!
//! - **MP4** (H.264) - 默认格式
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)
//!
//! ## URL Scheme
//!
//! `gst:///output.mp4?fps=30`，`fps` 默认为 30。
//!
//! ```no_run
//! use linzhi::{FromUrl, output::GStreamerVideoOutput};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst:///output.mp4?fps=25")?;
//! let output = GStreamerVideoOutput::from_url(&url)?;
//! # Ok(())
//! # }
//! ```

use std::{
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 绘制错误
  #[error("Draw error: {0}")]
  DrawError(#[from] DrawError),
  /// 帧错误
  #[error("Frame error: {0}")]
  FrameError(#[from] crate::frame::FrameError),
}

const DEFAULT_FPS: i32 = 30;

/// 按扩展名选择编码器与封装格式，未知扩展名按 MP4 处理
pub fn encoder_pipeline(path: &Path) -> String {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());
  let tail = match ext.as_deref() {
    Some("mkv") => "video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux",
    Some("avi") => "video/x-raw,format=I420 ! x264enc ! avimux",
    Some("webm") => "vp8enc ! webmmux",
    _ => "video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux",
  };
  format!(
    "appsrc name=src ! videoconvert ! {} ! filesink location=\"{}\"",
    tail,
    path.display()
  )
}

/// 由 appsrc 驱动的 GStreamer 管道，caps 由第一帧确定
pub(crate) struct AppSrcPipeline {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  fps: i32,
  frame_count: u64,
}

impl AppSrcPipeline {
  pub(crate) fn launch(
    description: &str,
    width: u32,
    height: u32,
    fps: i32,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;
    info!("Creating output pipeline: {}", description);

    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    appsrc.set_caps(Some(&Self::caps(width, height, fps)));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("Output pipeline started: {}x{} @ {} fps", width, height, fps);

    Ok(Self {
      pipeline,
      appsrc,
      width,
      height,
      fps,
      frame_count: 0,
    })
  }

  fn caps(width: u32, height: u32, fps: i32) -> gst::Caps {
    gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps, 1))
      .build()
  }

  pub(crate) fn size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  /// 帧尺寸变化时更新 caps，仅用于能重新协商的管道（显示窗口）
  pub(crate) fn resize(&mut self, width: u32, height: u32) {
    self.width = width;
    self.height = height;
    self
      .appsrc
      .set_caps(Some(&Self::caps(width, height, self.fps)));
  }

  pub(crate) fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let mut buffer = gst::Buffer::from_slice(data.to_vec());

    let frame_ns = 1_000_000_000 / self.fps.max(1) as u64;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }
}

/// 收到 EOS 表示封装器已写完文件
fn finish_status(msg: Option<&gst::Message>) -> Result<(), GStreamerVideoOutputError> {
  match msg.map(|m| m.view()) {
    Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(format!(
      "{} ({})",
      err.error(),
      err.debug().map(|d| d.to_string()).unwrap_or_default()
    ))),
    Some(_) => Ok(()),
    None => Err(GStreamerVideoOutputError::PipelineError(
      "Timed out waiting for EOS".to_string(),
    )),
  }
}

impl Drop for AppSrcPipeline {
  fn drop(&mut self) {
    // EOS 让封装器写完文件尾
    if let Err(e) = self.appsrc.end_of_stream() {
      warn!("Failed to send EOS: {:?}", e);
    }
    if let Some(bus) = self.pipeline.bus() {
      let msg = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(5),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
      if let Err(e) = finish_status(msg.as_ref()) {
        warn!("Output file may be incomplete: {}", e);
      }
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer output pipeline: {}", e);
    }
    info!(
      "Output pipeline closed. Total frames written: {}",
      self.frame_count
    );
  }
}

/// GStreamer 视频文件输出
///
/// 第一帧到达时创建编码管道，之后尺寸不同的帧缩放到第一帧的尺寸。
pub struct GStreamerVideoOutput {
  path: PathBuf,
  fps: i32,
  draw: Arc<Draw>,
  pipeline: Mutex<Option<AppSrcPipeline>>,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<i32>().ok())
      .filter(|fps| *fps > 0)
      .unwrap_or(DEFAULT_FPS);

    Ok(GStreamerVideoOutput {
      path: crate::url_path(url),
      fps,
      draw: Arc::new(Draw::new()?),
      pipeline: Mutex::new(None),
    })
  }
}

impl GStreamerVideoOutput {
  pub fn with_draw(mut self, draw: Arc<Draw>) -> Self {
    self.draw = draw;
    self
  }

  pub fn fps(&self) -> i32 {
    self.fps
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn write(&self, frame: RgbNhwcFrame) -> Result<(), GStreamerVideoOutputError> {
    let mut guard = self
      .pipeline
      .lock()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("Output lock poisoned".to_string()))?;

    if guard.is_none() {
      if let Some(parent) = self.path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent).map_err(|e| {
          GStreamerVideoOutputError::PipelineError(format!("Failed to create directory: {}", e))
        })?;
      }
      let description = encoder_pipeline(&self.path);
      let (h, w) = frame.shape();
      *guard = Some(AppSrcPipeline::launch(&description, w, h, self.fps)?);
    }
    let pipeline = guard
      .as_mut()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Pipeline not started".to_string()))?;

    let (w, h) = pipeline.size();
    if frame.shape() != (h, w) {
      let image = frame.to_rgb_image()?;
      let resized = imageops::resize(&image, w, h, FilterType::Triangle);
      pipeline.push_frame(resized.as_raw())
    } else {
      pipeline.push_frame(frame.as_nhwc())
    }
  }
}

impl Render<RgbNhwcFrame, DetectResult> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, frame: &RgbNhwcFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let annotated = self.draw.annotate_result(frame, result)?;
    self.write(annotated)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encoder_follows_extension() {
    let p = encoder_pipeline(Path::new("/tmp/out.webm"));
    assert!(p.contains("vp8enc ! webmmux"));
    assert!(p.starts_with("appsrc name=src ! videoconvert"));
    assert!(p.ends_with("filesink location=\"/tmp/out.webm\""));

    assert!(encoder_pipeline(Path::new("a.MKV")).contains("matroskamux"));
    assert!(encoder_pipeline(Path::new("a.avi")).contains("avimux"));
    assert!(encoder_pipeline(Path::new("a.mov")).contains("mp4mux"));
  }

  #[test]
  fn fps_query() {
    let output = GStreamerVideoOutput::from_url(&Url::parse("gst:///tmp/a.mp4?fps=25").unwrap())
      .unwrap();
    assert_eq!(output.fps(), 25);
    assert_eq!(output.path(), Path::new("/tmp/a.mp4"));

    let output =
      GStreamerVideoOutput::from_url(&Url::parse("gst:///tmp/a.mp4?fps=0").unwrap()).unwrap();
    assert_eq!(output.fps(), DEFAULT_FPS);

    let output =
      GStreamerVideoOutput::from_url(&Url::parse("gst:///tmp/my clip.mp4").unwrap()).unwrap();
    assert_eq!(output.path(), Path::new("/tmp/my clip.mp4"));
  }

  #[test]
  fn bus_error_on_close_is_reported() {
    gst::init().unwrap();
    assert!(finish_status(Some(&gst::message::Eos::new())).is_ok());

    let msg = gst::message::Error::new(gst::ResourceError::Write, "No space left on device");
    let err = finish_status(Some(&msg)).unwrap_err();
    assert!(err.to_string().contains("No space left on device"));

    assert!(finish_status(None).is_err());
  }

  #[test]
  fn wrong_scheme() {
    assert!(matches!(
      GStreamerVideoOutput::from_url(&Url::parse("image:///tmp/a.png").unwrap()),
      Err(GStreamerVideoOutputError::SchemeMismatch)
    ));
  }
}
