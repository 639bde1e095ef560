// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model/tensor.rs - 模型输入张量
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

use half::f16;
use ort::value::{DynValue, Tensor};

use crate::{
  frame::{FrameError, RgbNhwcFrame},
  model::ops::{LetterboxInfo, letterbox},
};

/// 张量数值精度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
  #[default]
  Full,
  Half,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  F32(Vec<f32>),
  F16(Vec<f16>),
}

/// NCHW 排列、取值范围 `[0, 1]` 的模型输入
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  shape: [usize; 4],
  data: TensorData,
  letterbox: Vec<LetterboxInfo>,
}

impl InputTensor {
  /// 将若干帧信箱缩放到 `size` (高, 宽) 并拼成一个批次
  pub fn from_frames(
    frames: &[&RgbNhwcFrame],
    size: (u32, u32),
    precision: Precision,
  ) -> Result<Self, FrameError> {
    let (h, w) = (size.0 as usize, size.1 as usize);
    let plane = h * w;
    let mut values = Vec::with_capacity(frames.len() * 3 * plane);
    let mut infos = Vec::with_capacity(frames.len());

    for frame in frames {
      let image = frame.to_rgb_image()?;
      let (boxed, info) = letterbox(&image, size);
      let raw = boxed.as_raw();

      // HWC -> CHW
      for c in 0..3 {
        values.extend((0..plane).map(|idx| raw[idx * 3 + c] as f32 / 255.0));
      }
      infos.push(info);
    }

    let data = match precision {
      Precision::Full => TensorData::F32(values),
      Precision::Half => TensorData::F16(values.into_iter().map(f16::from_f32).collect()),
    };

    Ok(Self {
      shape: [frames.len(), 3, h, w],
      data,
      letterbox: infos,
    })
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  /// 空间尺寸 (高, 宽)
  pub fn spatial_shape(&self) -> (u32, u32) {
    (self.shape[2] as u32, self.shape[3] as u32)
  }

  pub fn precision(&self) -> Precision {
    match self.data {
      TensorData::F32(_) => Precision::Full,
      TensorData::F16(_) => Precision::Half,
    }
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn letterbox(&self) -> &[LetterboxInfo] {
    &self.letterbox
  }

  pub(crate) fn to_value(&self) -> Result<DynValue, ort::Error> {
    Ok(match &self.data {
      TensorData::F32(v) => Tensor::from_array((self.shape, v.clone().into_boxed_slice()))?.into_dyn(),
      TensorData::F16(v) => Tensor::from_array((self.shape, v.clone().into_boxed_slice()))?.into_dyn(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(w: u32, h: u32, rgb: [u8; 3]) -> RgbNhwcFrame {
    let data = (0..w * h).flat_map(|_| rgb).collect();
    RgbNhwcFrame::from_raw(w, h, data).unwrap()
  }

  #[test]
  fn full_precision_is_normalized_chw() {
    let f = frame(4, 4, [255, 0, 51]);
    let t = InputTensor::from_frames(&[&f], (8, 8), Precision::Full).unwrap();
    assert_eq!(t.shape(), [1, 3, 8, 8]);
    assert_eq!(t.spatial_shape(), (8, 8));
    assert_eq!(t.precision(), Precision::Full);

    let TensorData::F32(v) = t.data() else {
      panic!("expected f32 data");
    };
    assert_eq!(v.len(), 3 * 64);
    assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
    // 中心像素：R 平面、G 平面、B 平面
    let center = 4 * 8 + 4;
    assert_eq!(v[center], 1.0);
    assert_eq!(v[64 + center], 0.0);
    assert!((v[128 + center] - 0.2).abs() < 1e-6);
  }

  #[test]
  fn half_precision_stacks_batch() {
    let a = frame(2, 2, [0, 0, 0]);
    let b = frame(6, 3, [255, 255, 255]);
    let t = InputTensor::from_frames(&[&a, &b], (4, 4), Precision::Half).unwrap();
    assert_eq!(t.shape(), [2, 3, 4, 4]);
    assert_eq!(t.letterbox().len(), 2);

    let TensorData::F16(v) = t.data() else {
      panic!("expected f16 data");
    };
    assert_eq!(v.len(), 2 * 3 * 16);
    assert_eq!(v[0].to_f32(), 0.0);
  }

  #[test]
  fn empty_frame_is_rejected() {
    let f = RgbNhwcFrame::with_shape(0, 0);
    assert!(InputTensor::from_frames(&[&f], (8, 8), Precision::Full).is_err());
  }
}
