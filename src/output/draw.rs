// 该文件是 Linzhi （林芝） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;

use crate::{
  frame::{FrameError, RgbNhwcFrame},
  model::{DetectItem, DetectResult, Labels},
};

pub const DEFAULT_LINE_WIDTH: u32 = 2;

const FONT_DATA: &[u8] = include_bytes!("../../assets/font.ttf");
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_PADDING: i32 = 3;

// 按类别循环使用的调色板
const PALETTE: [[u8; 3]; 20] = [
  [0xFF, 0x38, 0x38],
  [0xFF, 0x9D, 0x97],
  [0xFF, 0x70, 0x1F],
  [0xFF, 0xB2, 0x1D],
  [0xCF, 0xD2, 0x31],
  [0x48, 0xF9, 0x0A],
  [0x92, 0xCC, 0x17],
  [0x3D, 0xDB, 0x86],
  [0x1A, 0x93, 0x34],
  [0x00, 0xD4, 0xBB],
  [0x2C, 0x99, 0xA8],
  [0x00, 0xC2, 0xFF],
  [0x34, 0x45, 0x93],
  [0x64, 0x73, 0xFF],
  [0x00, 0x18, 0xEC],
  [0x84, 0x38, 0xFF],
  [0x52, 0x00, 0x85],
  [0xCB, 0x38, 0xFF],
  [0xFF, 0x95, 0xC8],
  [0xFF, 0x37, 0xC7],
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法加载嵌入的字体文件: {0}")]
  FontError(#[from] InvalidFont),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

pub fn class_color(class_id: u32) -> Rgb<u8> {
  Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// 检测框与标签绘制器
pub struct Draw {
  font: FontRef<'static>,
  font_size: f32,
  line_width: u32,
}

impl Draw {
  pub fn new() -> Result<Self, DrawError> {
    let font = FontRef::try_from_slice(FONT_DATA)?;
    Ok(Self {
      font,
      font_size: font_size_for(DEFAULT_LINE_WIDTH),
      line_width: DEFAULT_LINE_WIDTH,
    })
  }

  pub fn with_line_width(mut self, line_width: u32) -> Self {
    self.line_width = line_width.max(1);
    self.font_size = font_size_for(self.line_width);
    self
  }

  pub fn line_width(&self) -> u32 {
    self.line_width
  }

  /// 在帧的副本上绘制检测结果，原帧保持不变
  pub fn annotate(
    &self,
    frame: &RgbNhwcFrame,
    items: &[DetectItem],
    labels: &Labels,
  ) -> Result<RgbNhwcFrame, DrawError> {
    if items.is_empty() {
      return Ok(frame.clone());
    }

    let mut image = frame.to_rgb_image()?;
    self.draw_on_image(&mut image, items, labels);
    Ok(frame.with_image(image))
  }

  pub fn annotate_result(
    &self,
    frame: &RgbNhwcFrame,
    result: &DetectResult,
  ) -> Result<RgbNhwcFrame, DrawError> {
    self.annotate(frame, &result.items, &result.labels)
  }

  pub fn draw_on_image(&self, image: &mut RgbImage, items: &[DetectItem], labels: &Labels) {
    for item in items {
      self.draw_bbox_with_label(image, item, labels);
    }
  }

  // bbox 为原始帧像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, labels: &Labels) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = class_color(item.class_id);

    // 边框向内加粗
    for t in 0..self.line_width as i32 {
      let (left, top) = (x_min + t, y_min + t);
      let (right, bottom) = (x_max - t, y_max - t);
      if left >= right || top >= bottom {
        break;
      }
      let rect = Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = labels.caption(item.class_id, item.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, &self.font, &label);
    let label_w = (text_w as i32 + 2 * LABEL_PADDING).min(w);
    let label_h = text_h as i32 + 2 * LABEL_PADDING;

    // 框上方没有空间时放到框内
    let label_y = if y_min >= label_h {
      y_min - label_h
    } else {
      y_min
    };
    let label_x = x_min.min(w - label_w).max(0);
    let label_h = label_h.min(h - label_y);
    if label_w <= 0 || label_h <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      TEXT_COLOR,
      label_x + LABEL_PADDING,
      label_y + LABEL_PADDING,
      scale,
      &self.font,
      &label,
    );
  }
}

fn font_size_for(line_width: u32) -> f32 {
  (line_width as f32 * 8.0).max(12.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gray_frame(w: u32, h: u32) -> RgbNhwcFrame {
    RgbNhwcFrame::from(RgbImage::from_pixel(w, h, Rgb([90, 90, 90])))
  }

  #[test]
  fn empty_detections_return_identical_copy() {
    let draw = Draw::new().unwrap();
    let frame = gray_frame(64, 48).with_index(7);
    let out = draw.annotate(&frame, &[], &Labels::coco()).unwrap();
    assert_eq!(out, frame);
  }

  #[test]
  fn annotate_leaves_input_untouched() {
    let draw = Draw::new().unwrap();
    let frame = gray_frame(120, 100);
    let before = frame.clone();
    let items = [DetectItem {
      class_id: 0,
      score: 0.876,
      bbox: [30.0, 40.0, 90.0, 95.0],
    }];

    let out = draw.annotate(&frame, &items, &Labels::coco()).unwrap();
    assert_eq!(frame, before);
    assert_eq!(out.shape(), frame.shape());
    assert_ne!(out, frame);

    // 左边框使用类别颜色
    let image = out.to_rgb_image().unwrap();
    assert_eq!(*image.get_pixel(30, 70), class_color(0));
    assert_eq!(*image.get_pixel(31, 70), class_color(0));
    assert_eq!(*image.get_pixel(60, 70), Rgb([90, 90, 90]));
  }

  #[test]
  fn label_goes_inside_box_at_top_edge() {
    let draw = Draw::new().unwrap();
    let frame = gray_frame(100, 100);
    let items = [DetectItem {
      class_id: 3,
      score: 0.5,
      bbox: [10.0, 0.0, 90.0, 90.0],
    }];
    let out = draw.annotate(&frame, &items, &Labels::coco()).unwrap();
    let image = out.to_rgb_image().unwrap();
    // 标签背景从框顶部向下填充
    assert_eq!(*image.get_pixel(12, 3), class_color(3));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let draw = Draw::new().unwrap().with_line_width(4);
    let frame = gray_frame(20, 20);
    let items = [
      DetectItem {
        class_id: 1,
        score: 0.9,
        bbox: [5.0, 5.0, 5.0, 15.0],
      },
      DetectItem {
        class_id: 1,
        score: 0.9,
        bbox: [-50.0, -50.0, -10.0, -10.0],
      },
    ];
    let out = draw.annotate(&frame, &items, &Labels::coco()).unwrap();
    assert_eq!(out, frame);
  }

  #[test]
  fn palette_wraps() {
    assert_eq!(class_color(0), class_color(20));
    assert_eq!(class_color(1), Rgb([0xFF, 0x9D, 0x97]));
  }
}
