// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 基于 GStreamer 解码视频文件或采集摄像头画面，输出原始分辨率的 RGB 帧。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL 形式
//!
//! - `gst://file/path/to/demo.mp4?rotate=90`
//! - `gst://camera/dev/video0?width=1280&height=720&fps=30&format=YUY2`
//!
//! ```no_run
//! use linzhi::{FromUrl, input::GStreamerInputPipelineBuilder};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst://file/data/demo.mp4")?;
//! let input = GStreamerInputPipelineBuilder::from_url(&url)?.build()?;
//! for frame in input {
//!     let frame = frame?;
//!     println!("帧 {}: {}x{}", frame.index(), frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, path::PathBuf};

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 输入文件不存在
  #[error("Input file not found: {}", .0.display())]
  FileNotFound(PathBuf),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

impl GStreamerInputError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, GStreamerInputError::FileNotFound(_))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        let mut caps = String::from("video/x-raw");
        if let Some(format) = format {
          caps.push_str(&format!(",format={}", format));
        }
        if let Some(width) = width {
          caps.push_str(&format!(",width={}", width));
        }
        if let Some(height) = height {
          caps.push_str(&format!(",height={}", height));
        }
        if let Some(fps) = fps {
          caps.push_str(&format!(",framerate={}/1", fps));
        }
        format!("v4l2src device={}{} ! {}", camera, io_mode_str, caps)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

/// GStreamer 输入管道构建器
#[derive(Debug, Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn file(mut self, path: &str) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.to_string()));
    self
  }

  pub fn camera(mut self, device: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: device.to_string(),
      io_mode: None,
      format: None,
      width: None,
      height: None,
      fps: None,
    });
    self.live = true;
    self
  }

  fn camera_with_query(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());

    let mut builder = Self::new();
    builder.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: parse("io-mode"),
      format: query.get("format").cloned(),
      width: parse("width"),
      height: parse("height"),
      fps: parse("fps"),
    });
    builder.live = true;
    builder
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }

  pub fn pipeline_description(&self) -> String {
    let mut items: Vec<String> = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect();
    if !self
      .items
      .iter()
      .any(|item| matches!(item, GStreamerInputBuilderItem::TargetFormat { .. }))
    {
      items.push(
        GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        }
        .to_pipeline(),
      );
    }

    // 文件输入不丢帧，摄像头只保留最新画面
    let sink = if self.live {
      "appsink name=sink max-buffers=2 drop=true"
    } else {
      "appsink name=sink sync=false max-buffers=4"
    };
    format!("{} ! {}", items.join(" ! "), sink)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      next_index: 0,
      finished: false,
    })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = crate::url_path(url);
    let mut builder = match url.host_str() {
      Some("camera") => Self::camera_with_query(&path.to_string_lossy(), &query),
      Some("file") => {
        if !path.exists() {
          error!("Input file not found: {}", path.display());
          return Err(GStreamerInputError::FileNotFound(path));
        }
        Self::new().file(&path.to_string_lossy())
      }
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(|s| s.as_ref())) {
      builder.items.push(video_flip);
    }

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，按顺序产生视频帧，流结束时迭代结束。
/// 解码或管道出错时产出一次错误，随后迭代结束。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  next_index: u64,
  finished: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  /// 取出管道总线上的错误消息
  fn bus_error(&self) -> Option<GStreamerInputError> {
    let bus = self.pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
      gst::MessageView::Error(err) => Some(GStreamerInputError::PipelineError(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      ))),
      _ => None,
    }
  }

  /// 流正常结束时返回 `Ok(None)`
  fn pull_sample(&self) -> Result<Option<gst::Sample>, GStreamerInputError> {
    match self.appsink.pull_sample() {
      Ok(sample) => Ok(Some(sample)),
      Err(e) => {
        if let Some(err) = self.bus_error() {
          return Err(err);
        }
        if self.appsink.is_eos() {
          info!("GStreamer input reached end of stream");
          return Ok(None);
        }
        Err(GStreamerInputError::PipelineError(format!(
          "Failed to pull sample: {}",
          e
        )))
      }
    }
  }

  fn next_frame(&mut self) -> Result<Option<RgbNhwcFrame>, GStreamerInputError> {
    let Some(sample) = self.pull_sample()? else {
      return Ok(None);
    };
    let frame = convert_sample_to_nhwc(sample)?;

    let index = self.next_index;
    self.next_index += 1;
    debug!("GStreamer frame {}: {}x{}", index, frame.width(), frame.height());
    Ok(Some(frame.with_index(index)))
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<RgbNhwcFrame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    match self.next_frame() {
      Ok(Some(frame)) => Some(Ok(frame)),
      Ok(None) => {
        self.finished = true;
        None
      }
      Err(e) => {
        error!("Failed to fetch sample: {}", e);
        self.finished = true;
        Some(Err(e))
      }
    }
  }
}

/// 按行拷贝像素，处理行跨度大于 `width * 3` 的情况
fn copy_rows(
  data: &[u8],
  width: usize,
  height: usize,
  stride: usize,
  bgr: bool,
) -> Result<Vec<u8>, GStreamerInputError> {
  let row = width * 3;
  let expected = if height == 0 { 0 } else { stride * (height - 1) + row };
  if data.len() < expected || stride < row {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut out = Vec::with_capacity(row * height);
  for h in 0..height {
    let line = &data[h * stride..h * stride + row];
    if bgr {
      for px in line.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      out.extend_from_slice(line);
    }
  }
  Ok(out)
}

fn convert_sample_to_nhwc(sample: gst::Sample) -> Result<RgbNhwcFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };
  let data = copy_rows(map.as_slice(), width, height, stride, bgr)?;

  let pts_ms = buffer.pts().map(|t| t.mseconds());
  RgbNhwcFrame::from_raw(width as u32, height as u32, data)
    .map(|frame| frame.with_pts_ms(pts_ms))
    .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_url_builds_decode_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo clip.mp4");
    std::fs::write(&path, b"").unwrap();

    let url = Url::parse(&format!("gst://file{}?rotate=90", path.display())).unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.pipeline_description(),
      format!(
        "filesrc location=\"{}\" ! decodebin ! videoflip method=1 video-direction=1 \
         ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4",
        path.display()
      )
    );
  }

  #[test]
  fn missing_file_url_is_not_found() {
    let url = Url::parse("gst://file/nonexistent/demo.mp4").unwrap();
    let err = GStreamerInputPipelineBuilder::from_url(&url).unwrap_err();
    assert!(matches!(err, GStreamerInputError::FileNotFound(ref p) if p.ends_with("demo.mp4")));
    assert!(err.is_not_found());
  }

  #[test]
  fn camera_url_keeps_only_given_caps() {
    let url = Url::parse("gst://camera/dev/video0?width=1280&height=720&fps=30").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.pipeline_description(),
      "v4l2src device=/dev/video0 ! video/x-raw,width=1280,height=720,framerate=30/1 \
       ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=2 drop=true"
    );
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://network/stream").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }

  #[test]
  fn rows_are_copied_without_padding() {
    // 2x2 RGB，行跨度 8 字节
    let data = [
      1, 2, 3, 4, 5, 6, 0, 0, //
      7, 8, 9, 10, 11, 12,
    ];
    assert_eq!(
      copy_rows(&data, 2, 2, 8, false).unwrap(),
      vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
    );
    assert_eq!(
      copy_rows(&data, 2, 2, 8, true).unwrap(),
      vec![3, 2, 1, 6, 5, 4, 9, 8, 7, 12, 11, 10]
    );
    assert!(copy_rows(&data[..10], 2, 2, 8, false).is_err());
  }
}
