// 该文件是 Linzhi （林芝） 项目的一部分。
// src/error.rs - 顶层错误
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

use std::path::PathBuf;

use thiserror::Error;

use crate::{
  input::InputError,
  model::YoloError,
  output::{OutputError, draw::DrawError},
};

/// 错误分类：所需文件缺失，或其他错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  MissingFile,
  Other,
}

#[derive(Error, Debug)]
pub enum PredictError {
  #[error("模型错误: {0}")]
  Model(#[from] YoloError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("绘制错误: {0}")]
  Draw(#[from] DrawError),
  #[error("无法读取类别文件 {}: {source}", path.display())]
  Labels {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error(transparent)]
  Task(#[from] anyhow::Error),
}

impl PredictError {
  pub fn kind(&self) -> ErrorKind {
    let missing = match self {
      PredictError::Model(YoloError::ModelNotFound(_)) => true,
      PredictError::Input(e) => e.is_not_found(),
      PredictError::Labels { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
      // 任务循环中读取帧失败
      PredictError::Task(e) => e
        .downcast_ref::<InputError>()
        .is_some_and(InputError::is_not_found),
      _ => false,
    };

    if missing {
      ErrorKind::MissingFile
    } else {
      ErrorKind::Other
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_files_are_classified() {
    let err = PredictError::from(YoloError::ModelNotFound(PathBuf::from("best.onnx")));
    assert_eq!(err.kind(), ErrorKind::MissingFile);

    let err = PredictError::from(InputError::NotFound(PathBuf::from("video.mp4")));
    assert_eq!(err.kind(), ErrorKind::MissingFile);

    let err = PredictError::Labels {
      path: PathBuf::from("names.txt"),
      source: std::io::Error::from(std::io::ErrorKind::NotFound),
    };
    assert_eq!(err.kind(), ErrorKind::MissingFile);
  }

  #[test]
  fn everything_else_is_other() {
    let err = PredictError::from(YoloError::UnsupportedFormat(PathBuf::from("best.pt")));
    assert_eq!(err.kind(), ErrorKind::Other);

    let err = PredictError::from(anyhow::anyhow!("没有输入帧"));
    assert_eq!(err.kind(), ErrorKind::Other);

    let read = InputError::ImageFileInputError(crate::input::ImageFileInputError::ReadFailed {
      path: PathBuf::from("bus.png"),
      source: image::ImageError::IoError(std::io::ErrorKind::InvalidData.into()),
    });
    let err = PredictError::from(anyhow::Error::from(read));
    assert_eq!(err.kind(), ErrorKind::Other);

    let err = PredictError::Labels {
      path: PathBuf::from("names.txt"),
      source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    };
    assert_eq!(err.kind(), ErrorKind::Other);
  }
}
