// 该文件是 Linzhi （林芝） 项目的一部分。
// src/model/labels.rs - 类别名称表
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

use std::{borrow::Cow, collections::BTreeMap, path::Path};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 以类别编号索引的类别名称表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: BTreeMap<u32, String>,
}

impl Labels {
  pub fn coco() -> Self {
    Self::from_names(COCO_CLASSES)
  }

  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names
        .into_iter()
        .enumerate()
        .map(|(id, name)| (id as u32, name.into()))
        .collect(),
    }
  }

  /// 每行一个类别名称，空行忽略
  pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    Ok(Self::from_names(
      text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty()),
    ))
  }

  /// 解析导出模型元数据中的 `names` 字段，形如 `{0: 'person', 1: 'bicycle'}`
  pub fn from_metadata(text: &str) -> Option<Self> {
    let body = text.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut names = BTreeMap::new();
    let mut chars = body.chars().peekable();

    loop {
      while chars
        .peek()
        .is_some_and(|c| c.is_whitespace() || *c == ',')
      {
        chars.next();
      }
      if chars.peek().is_none() {
        break;
      }

      let mut key = String::new();
      while let Some(c) = chars.peek().copied() {
        if c == ':' {
          break;
        }
        key.push(c);
        chars.next();
      }
      let id: u32 = key.trim().parse().ok()?;
      chars.next()?; // ':'

      while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
      }
      let quote = chars.next()?;
      if quote != '\'' && quote != '"' {
        return None;
      }

      let mut name = String::new();
      loop {
        match chars.next()? {
          '\\' => name.push(chars.next()?),
          c if c == quote => break,
          c => name.push(c),
        }
      }
      names.insert(id, name);
    }

    if names.is_empty() {
      None
    } else {
      Some(Self { names })
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> Cow<'_, str> {
    match self.names.get(&class_id) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(format!("class{}", class_id)),
    }
  }

  /// 标注文本：类别名称与两位小数的置信度
  pub fn caption(&self, class_id: u32, score: f32) -> String {
    format!("{} {:.2}", self.name(class_id), score)
  }
}
