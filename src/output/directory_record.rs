// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 按日期分目录保存检测结果
//!
//! `folder:///data/record` 将标注后的图片保存到 `/data/record/YYYY/MM/DD/`，
//! 默认只保存有检测结果的帧，加 `always` 参数保存全部帧。
//!
//! `record=name|id|json` 保存原始帧，同时写入同名的检测记录文件
//! （`name`/`id` 为 `.txt`，`json` 为 `.json`）。

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU16, Ordering},
  },
};

use chrono::{Datelike, Local};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbNhwcFrame},
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
  /// 保存标注后的图片
  Draw,
  /// 原始图片 + 以类别名称记录的文本
  Name,
  /// 原始图片 + 以类别编号记录的文本
  Id,
  /// 原始图片 + JSON 记录
  Json,
}

impl RecordMode {
  fn from_query(value: &str) -> Self {
    match value {
      "id" => RecordMode::Id,
      "json" => RecordMode::Json,
      _ => RecordMode::Name,
    }
  }
}

/// 每行一个检测：`名称, 置信度, x1, y1, x2, y2`
pub fn format_record(result: &DetectResult, with_name: bool) -> String {
  result
    .items
    .iter()
    .map(|item| {
      let name = if with_name {
        result.labels.name(item.class_id).into_owned()
      } else {
        item.class_id.to_string()
      };
      format!(
        "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
        name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
      )
    })
    .collect::<Vec<_>>()
    .join("\n")
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  mode: RecordMode,
  draw: Arc<Draw>,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mode = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| RecordMode::from_query(&v))
      .unwrap_or(RecordMode::Draw);
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: crate::url_path(uri),
      mode,
      draw: Arc::new(Draw::new()?),
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn with_draw(mut self, draw: Arc<Draw>) -> Self {
    self.draw = draw;
    self
  }

  pub fn mode(&self) -> RecordMode {
    self.mode
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save_result(
    &self,
    path: &Path,
    frame: &RgbNhwcFrame,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self.mode {
      RecordMode::Draw => {
        let annotated = self.draw.annotate_result(frame, result)?;
        annotated.to_rgb_image()?.save(path)?;
      }
      RecordMode::Name | RecordMode::Id => {
        frame.to_rgb_image()?.save(path)?;
        let record = format_record(result, self.mode == RecordMode::Name);
        std::fs::write(path.with_extension("txt"), record)?;
      }
      RecordMode::Json => {
        frame.to_rgb_image()?.save(path)?;
        let record = serde_json::to_string_pretty(&result.to_json())?;
        std::fs::write(path.with_extension("json"), record)?;
      }
    }
    debug!("记录帧 {} 到 {}", result.frame_index, path.display());
    Ok(())
  }
}

impl Render<RgbNhwcFrame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbNhwcFrame, result: &DetectResult) -> Result<(), Self::Error> {
    if self.always || !result.is_empty() {
      let path = self.frame_path()?;
      self.save_result(&path, frame, result)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectItem, Labels};
  use image::RgbImage;
  use url::Url;

  fn result(items: Vec<DetectItem>) -> DetectResult {
    DetectResult {
      items: items.into_boxed_slice(),
      labels: Arc::new(Labels::coco()),
      orig_shape: (16, 16),
      frame_index: 3,
      pts_ms: None,
      speed: Default::default(),
    }
  }

  fn person() -> DetectItem {
    DetectItem {
      class_id: 0,
      score: 0.5,
      bbox: [1.0, 2.0, 10.0, 12.0],
    }
  }

  fn files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
      for entry in std::fs::read_dir(d).unwrap() {
        let p = entry.unwrap().path();
        if p.is_dir() {
          stack.push(p);
        } else {
          out.push(p);
        }
      }
    }
    out.sort();
    out
  }

  #[test]
  fn query_selects_mode() {
    let parse = |s: &str| DirectoryRecordOutput::from_url(&Url::parse(s).unwrap()).unwrap();
    assert_eq!(parse("folder:///tmp/r").mode(), RecordMode::Draw);
    assert_eq!(parse("folder:///tmp/r?record=id").mode(), RecordMode::Id);
    assert_eq!(parse("folder:///tmp/r?record=json").mode(), RecordMode::Json);
    assert_eq!(parse("folder:///tmp/r?record").mode(), RecordMode::Name);
  }

  #[test]
  fn record_text_lines() {
    let r = result(vec![person()]);
    assert_eq!(format_record(&r, true), "person, 0.5000, 1.0, 2.0, 10.0, 12.0");
    assert_eq!(format_record(&r, false), "0, 0.5000, 1.0, 2.0, 10.0, 12.0");
  }

  #[test]
  fn empty_frames_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = RgbNhwcFrame::from(RgbImage::new(16, 16));

    let url = Url::parse(&format!("folder://{}/a", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &result(vec![])).unwrap();
    assert!(!dir.path().join("a").exists());

    let url = Url::parse(&format!("folder://{}/b c?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &result(vec![])).unwrap();
    assert_eq!(files(&dir.path().join("b c")).len(), 1);
  }

  #[test]
  fn json_record_written_next_to_frame() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}?record=json", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = RgbNhwcFrame::from(RgbImage::new(16, 16));
    output.render_result(&frame, &result(vec![person()])).unwrap();

    let written = files(dir.path());
    assert_eq!(written.len(), 2);
    let json = written
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "json"))
      .unwrap();
    let value: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(value["frame"], 3);
    assert_eq!(value["detections"][0]["name"], "person");
  }
}
