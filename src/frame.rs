// 该文件是 Linzhi （林芝） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸为空: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
}

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// NHWC（高 × 宽 × 通道）排列的 RGB 帧
///
/// 帧由输入源产生，调用方持有；`index` 为帧在来源中的序号，
/// `pts_ms` 为来源提供的显示时间戳（图片没有时间戳）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbNhwcFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
  index: u64,
  pts_ms: Option<u64>,
}

impl RgbNhwcFrame {
  /// 创建全零帧
  pub fn with_shape(height: usize, width: usize) -> Self {
    let data = vec![0u8; RGB_CHANNELS * height * width].into_boxed_slice();
    Self {
      width: width as u32,
      height: height as u32,
      data,
      index: 0,
      pts_ms: None,
    }
  }

  /// 由原始 RGB 数据创建帧，数据长度必须等于 `width * height * 3`
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
      index: 0,
      pts_ms: None,
    })
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }

  pub fn with_pts_ms(mut self, pts_ms: Option<u64>) -> Self {
    self.pts_ms = pts_ms;
    self
  }

  pub fn height(&self) -> usize {
    self.height as usize
  }

  pub fn width(&self) -> usize {
    self.width as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn pts_ms(&self) -> Option<u64> {
    self.pts_ms
  }

  /// 帧尺寸 (高, 宽)
  pub fn shape(&self) -> (u32, u32) {
    (self.height, self.width)
  }

  /// 检查帧是否可以送入模型
  pub fn validate(&self) -> Result<(), FrameError> {
    if self.width == 0 || self.height == 0 {
      return Err(FrameError::EmptyFrame {
        width: self.width,
        height: self.height,
      });
    }
    let expected = RGB_CHANNELS * self.width() * self.height();
    if self.data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: self.data.len(),
      });
    }
    Ok(())
  }

  pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
    self.validate()?;
    RgbImage::from_raw(self.width, self.height, self.data.to_vec()).ok_or(
      FrameError::LengthMismatch {
        expected: RGB_CHANNELS * self.width() * self.height(),
        actual: self.data.len(),
      },
    )
  }

  /// 用渲染后的图像替换像素内容，保留帧序号与时间戳
  pub fn with_image(&self, image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
      index: self.index,
      pts_ms: self.pts_ms,
    }
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
      index: 0,
      pts_ms: None,
    }
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_raw_rejects_wrong_length() {
    let err = RgbNhwcFrame::from_raw(4, 2, vec![0; 23]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 24,
        actual: 23
      }
    );
  }

  #[test]
  fn empty_frame_does_not_validate() {
    let frame = RgbNhwcFrame::with_shape(0, 16);
    assert!(matches!(
      frame.validate(),
      Err(FrameError::EmptyFrame { width: 16, height: 0 })
    ));
  }

  #[test]
  fn rgb_image_conversion_keeps_layout() {
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(2, 1, image::Rgb([10, 20, 30]));
    let frame = RgbNhwcFrame::from(image).with_index(7);

    assert_eq!(frame.shape(), (2, 3));
    let idx = (1 * 3 + 2) * RGB_CHANNELS;
    assert_eq!(&frame.as_nhwc()[idx..idx + 3], &[10, 20, 30]);

    let back = frame.to_rgb_image().unwrap();
    assert_eq!(back.get_pixel(2, 1).0, [10, 20, 30]);
    assert_eq!(frame.with_image(back).index(), 7);
  }
}
