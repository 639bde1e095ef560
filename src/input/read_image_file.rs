// 该文件是 Linzhi （林芝） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame};

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "gif", "webp", "tif", "tiff"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("No image found in directory: {}", .0.display())]
  EmptyDirectory(PathBuf),
  #[error("Failed to read image {}: {source}", path.display())]
  ReadFailed {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

impl ImageFileInputError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, ImageFileInputError::IoError(e) if e.kind() == std::io::ErrorKind::NotFound)
  }
}

pub fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
}

/// 图片文件输入，单个文件或目录中按文件名排序的全部图片
pub struct ImageFileInput {
  pending: VecDeque<PathBuf>,
  next_index: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(&crate::url_path(url))
  }
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let pending = if path.is_dir() {
      let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_path(p))
        .collect();
      if files.is_empty() {
        return Err(ImageFileInputError::EmptyDirectory(path.to_path_buf()));
      }
      files.sort();
      files.into()
    } else {
      // 尽早暴露文件不存在的错误
      std::fs::metadata(path)?;
      VecDeque::from([path.to_path_buf()])
    };

    Ok(ImageFileInput {
      pending,
      next_index: 0,
    })
  }

  fn read(path: &Path) -> Result<RgbNhwcFrame, ImageFileInputError> {
    let image = ImageReader::open(path)
      .map_err(image::ImageError::IoError)
      .and_then(|reader| reader.decode())
      .map_err(|source| ImageFileInputError::ReadFailed {
        path: path.to_path_buf(),
        source,
      })?;
    Ok(RgbNhwcFrame::from(image.to_rgb8()))
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<RgbNhwcFrame, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.pending.pop_front()?;
    let frame = match Self::read(&path) {
      Ok(frame) => frame,
      Err(e) => {
        error!("无法读取图片 {}: {}", path.display(), e);
        // 出错后不再继续读取
        self.pending.clear();
        return Some(Err(e));
      }
    };

    debug!("读取图片: {}", path.display());
    let index = self.next_index;
    self.next_index += 1;
    Some(Ok(frame.with_index(index)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn image_extensions() {
    assert!(is_image_path(Path::new("a/b.JPG")));
    assert!(is_image_path(Path::new("b.webp")));
    assert!(!is_image_path(Path::new("demo.mp4")));
    assert!(!is_image_path(Path::new("noext")));
  }

  #[test]
  fn directory_is_read_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbImage::new(2, 2).save(dir.path().join("b.png")).unwrap();
    image::RgbImage::new(3, 3).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

    let frames: Vec<_> = ImageFileInput::open(dir.path())
      .unwrap()
      .collect::<Result<_, _>>()
      .unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].shape(), (3, 3));
    assert_eq!(frames[0].index(), 0);
    assert_eq!(frames[1].index(), 1);
  }

  #[test]
  fn empty_directory_and_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageFileInput::open(dir.path()),
      Err(ImageFileInputError::EmptyDirectory(_))
    ));

    let err = ImageFileInput::open(&dir.path().join("missing.png"))
      .err()
      .unwrap();
    assert!(err.is_not_found());
  }

  #[test]
  fn scheme_is_checked() {
    let url = Url::parse("file:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn corrupt_image_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("bus.png"), b"garbage").unwrap();
    image::RgbImage::new(2, 2).save(dir.path().join("c.png")).unwrap();

    let mut input = ImageFileInput::open(dir.path()).unwrap();
    assert!(input.next().unwrap().is_ok());
    let err = input.next().unwrap().unwrap_err();
    assert!(matches!(err, ImageFileInputError::ReadFailed { ref path, .. } if path.ends_with("bus.png")));
    assert!(!err.is_not_found());
    assert!(input.next().is_none());
  }

  #[test]
  fn url_path_with_space_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("my photo.png");
    image::RgbImage::new(4, 2).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let frames: Vec<_> = ImageFileInput::from_url(&url)
      .unwrap()
      .collect::<Result<_, _>>()
      .unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].shape(), (2, 4));
  }
}
