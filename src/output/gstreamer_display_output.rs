// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/gstreamer_display_output.rs - GStreamer 窗口显示
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

use std::sync::{Arc, Mutex};

use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::DetectResult,
  output::{
    Render,
    draw::Draw,
    gstreamer_video_output::{AppSrcPipeline, GStreamerVideoOutputError},
  },
};

const DISPLAY_PIPELINE: &str =
  "appsrc name=src is-live=true ! videoconvert ! autovideosink sync=false";
const DISPLAY_FPS: i32 = 30;

/// 在窗口中实时显示标注后的帧
///
/// 窗口在第一帧到达时打开，帧尺寸变化时重新协商 caps。
pub struct GStreamerDisplayOutput {
  draw: Arc<Draw>,
  pipeline: Mutex<Option<AppSrcPipeline>>,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "display";
}

impl FromUrl for GStreamerDisplayOutput {
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
    Ok(Self::new(Arc::new(Draw::new()?)))
  }
}

impl GStreamerDisplayOutput {
  pub fn new(draw: Arc<Draw>) -> Self {
    Self {
      draw,
      pipeline: Mutex::new(None),
    }
  }

  fn show(&self, frame: &RgbNhwcFrame) -> Result<(), GStreamerVideoOutputError> {
    let mut guard = self
      .pipeline
      .lock()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("Display lock poisoned".to_string()))?;

    let (h, w) = frame.shape();
    if guard.is_none() {
      *guard = Some(AppSrcPipeline::launch(DISPLAY_PIPELINE, w, h, DISPLAY_FPS)?);
    }
    let pipeline = guard
      .as_mut()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Display not started".to_string()))?;

    if pipeline.size() != (w, h) {
      pipeline.resize(w, h);
    }
    pipeline.push_frame(frame.as_nhwc())
  }
}

impl Render<RgbNhwcFrame, DetectResult> for GStreamerDisplayOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, frame: &RgbNhwcFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let annotated = self.draw.annotate_result(frame, result)?;
    self.show(&annotated)
  }
}
