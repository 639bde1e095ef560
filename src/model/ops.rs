// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model/ops.rs - 预处理与后处理算子
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

use image::{Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::model::DetectItem;

pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MAX_DET: usize = 300;
const MAX_NMS_CANDIDATES: usize = 30_000;
const LETTERBOX_PAD_VALUE: u8 = 114;

/// 模型原始输出，布局为 `[batch, 4 + classes, anchors]`
///
/// 每个锚点的前四个通道为 `cx, cy, w, h`（输入张量像素坐标），
/// 其余通道为各类别得分。
#[derive(Debug, Clone, PartialEq)]
pub struct RawPredictions {
  batch: usize,
  channels: usize,
  anchors: usize,
  data: Vec<f32>,
}

impl RawPredictions {
  pub fn new(shape: &[usize], data: Vec<f32>) -> Option<Self> {
    let (batch, channels, anchors) = match *shape {
      [batch, channels, anchors] => (batch, channels, anchors),
      [channels, anchors] => (1, channels, anchors),
      _ => return None,
    };
    if channels <= 4 || batch * channels * anchors != data.len() {
      return None;
    }

    Some(Self {
      batch,
      channels,
      anchors,
      data,
    })
  }

  pub fn batch(&self) -> usize {
    self.batch
  }

  pub fn num_classes(&self) -> usize {
    self.channels - 4
  }

  pub fn anchors(&self) -> usize {
    self.anchors
  }

  #[inline]
  fn at(&self, b: usize, c: usize, a: usize) -> f32 {
    self.data[(b * self.channels + c) * self.anchors + a]
  }
}

/// 非极大值抑制参数
#[derive(Debug, Clone, PartialEq)]
pub struct NmsConfig {
  /// 置信度阈值，得分不低于该值的框被保留
  pub conf_threshold: f32,
  /// 与已保留同类框的 IoU 大于该值时被抑制
  pub iou_threshold: f32,
  pub max_det: usize,
  pub classes: Option<Vec<u32>>,
  /// 为真时不区分类别进行抑制
  pub agnostic: bool,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self {
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_det: DEFAULT_MAX_DET,
      classes: None,
      agnostic: false,
    }
  }
}

/// 计算两个 `[x_min, y_min, x_max, y_max]` 框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 对每张图像的候选框做置信度过滤与非极大值抑制
///
/// 返回的框仍位于输入张量坐标空间，按置信度降序排列。
pub fn non_max_suppression(raw: &RawPredictions, config: &NmsConfig) -> Vec<Vec<DetectItem>> {
  let num_classes = raw.num_classes();

  (0..raw.batch())
    .map(|b| {
      let mut candidates: Vec<DetectItem> = (0..raw.anchors())
        .filter_map(|a| {
          let (class_id, score) = (0..num_classes)
            .map(|c| (c, raw.at(b, 4 + c, a)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
              if cur.1 > best.1 { cur } else { best }
            });

          if !(score >= config.conf_threshold) {
            return None;
          }
          let class_id = class_id as u32;
          if let Some(classes) = &config.classes
            && !classes.contains(&class_id)
          {
            return None;
          }

          let cx = raw.at(b, 0, a);
          let cy = raw.at(b, 1, a);
          let w = raw.at(b, 2, a);
          let h = raw.at(b, 3, a);
          Some(DetectItem {
            class_id,
            score,
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
          })
        })
        .collect();

      candidates.sort_by(|x, y| y.score.total_cmp(&x.score));
      candidates.truncate(MAX_NMS_CANDIDATES);

      let mut kept: Vec<DetectItem> = Vec::new();
      for candidate in candidates {
        if kept.len() >= config.max_det {
          break;
        }
        let suppressed = kept.iter().any(|k| {
          (config.agnostic || k.class_id == candidate.class_id)
            && iou(&k.bbox, &candidate.bbox) > config.iou_threshold
        });
        if !suppressed {
          kept.push(candidate);
        }
      }

      debug!("图像 {}: NMS 后保留 {} 个框", b, kept.len());
      kept
    })
    .collect()
}

/// 信箱缩放参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
  pub gain: f32,
  /// 左、上填充像素
  pub pad: (u32, u32),
  /// 缩放后（未填充）的尺寸 (高, 宽)
  pub unpadded: (u32, u32),
}

impl LetterboxInfo {
  /// 计算 `orig` (高, 宽) 信箱缩放到 `new_shape` (高, 宽) 的参数
  pub fn new(orig: (u32, u32), new_shape: (u32, u32)) -> Self {
    let (h0, w0) = orig;
    let (h1, w1) = new_shape;

    let gain = (h1 as f32 / h0 as f32).min(w1 as f32 / w0 as f32);
    let unpad_w = ((w0 as f32 * gain).round_ties_even() as u32).clamp(1, w1);
    let unpad_h = ((h0 as f32 * gain).round_ties_even() as u32).clamp(1, h1);
    let dw = (w1 - unpad_w) as f32 / 2.0;
    let dh = (h1 - unpad_h) as f32 / 2.0;
    let left = (dw - 0.1).round_ties_even().max(0.0) as u32;
    let top = (dh - 0.1).round_ties_even().max(0.0) as u32;

    Self {
      gain,
      pad: (left, top),
      unpadded: (unpad_h, unpad_w),
    }
  }

  /// 将信箱空间中的框映射回 `to` (高, 宽) 的原始帧，并裁剪到帧内
  pub fn unscale(&self, boxes: &mut [DetectItem], to: (u32, u32)) {
    let (h0, w0) = (to.0 as f32, to.1 as f32);
    let (pad_x, pad_y) = (self.pad.0 as f32, self.pad.1 as f32);

    for item in boxes.iter_mut() {
      let [x1, y1, x2, y2] = item.bbox;
      item.bbox = [
        ((x1 - pad_x) / self.gain).clamp(0.0, w0),
        ((y1 - pad_y) / self.gain).clamp(0.0, h0),
        ((x2 - pad_x) / self.gain).clamp(0.0, w0),
        ((y2 - pad_y) / self.gain).clamp(0.0, h0),
      ];
    }
  }
}

/// 保持纵横比缩放到 `new_shape` (高, 宽)，其余区域以灰色填充并居中
pub fn letterbox(image: &RgbImage, new_shape: (u32, u32)) -> (RgbImage, LetterboxInfo) {
  let (w0, h0) = image.dimensions();
  let (h1, w1) = new_shape;
  let info = LetterboxInfo::new((h0, w0), new_shape);
  let (unpad_h, unpad_w) = info.unpadded;
  let (left, top) = info.pad;

  let mut canvas = RgbImage::from_pixel(w1, h1, Rgb([LETTERBOX_PAD_VALUE; 3]));
  if (unpad_w, unpad_h) == (w0, h0) {
    image::imageops::replace(&mut canvas, image, left as i64, top as i64);
  } else {
    let resized = image::imageops::resize(image, unpad_w, unpad_h, FilterType::Triangle);
    image::imageops::replace(&mut canvas, &resized, left as i64, top as i64);
  }

  (canvas, info)
}

/// 将框从 `from` (高, 宽) 的信箱空间映射回 `to` (高, 宽) 的原始帧，并裁剪到帧内
pub fn scale_boxes(from: (u32, u32), boxes: &mut [DetectItem], to: (u32, u32)) {
  let (h1, w1) = (from.0 as f32, from.1 as f32);
  let (h0, w0) = (to.0 as f32, to.1 as f32);

  let gain = (h1 / h0).min(w1 / w0);
  let pad_x = ((w1 - w0 * gain) / 2.0 - 0.1).round_ties_even().max(0.0);
  let pad_y = ((h1 - h0 * gain) / 2.0 - 0.1).round_ties_even().max(0.0);

  let info = LetterboxInfo {
    gain,
    pad: (pad_x as u32, pad_y as u32),
    unpadded: (
      from.0.saturating_sub(2 * pad_y as u32),
      from.1.saturating_sub(2 * pad_x as u32),
    ),
  };
  info.unscale(boxes, to);
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("批次大小不一致: 模型输出 {outputs} 张, 信箱参数 {letterbox} 组, 原始帧 {frames} 帧")]
pub struct BatchMismatch {
  pub outputs: usize,
  pub letterbox: usize,
  pub frames: usize,
}

/// 完整后处理：抑制、按预处理时的信箱参数映射回各原始帧并取整
///
/// `letterbox` 与 `orig_shapes` 须与批次一一对应，输出顺序与输入相同。
pub fn postprocess(
  raw: &RawPredictions,
  letterbox: &[LetterboxInfo],
  orig_shapes: &[(u32, u32)],
  config: &NmsConfig,
) -> Result<Vec<Vec<DetectItem>>, BatchMismatch> {
  if raw.batch() != orig_shapes.len() || letterbox.len() != orig_shapes.len() {
    return Err(BatchMismatch {
      outputs: raw.batch(),
      letterbox: letterbox.len(),
      frames: orig_shapes.len(),
    });
  }

  Ok(
    non_max_suppression(raw, config)
      .into_iter()
      .zip(letterbox.iter().zip(orig_shapes))
      .map(|(mut items, (info, &shape))| {
        info.unscale(&mut items, shape);
        for item in items.iter_mut() {
          for v in item.bbox.iter_mut() {
            *v = v.round_ties_even();
          }
        }
        items
      })
      .collect(),
  )
}
