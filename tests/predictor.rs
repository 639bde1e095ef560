// 该文件是 Linzhi （林芝） 项目的一部分。
// tests/predictor.rs - 推理封装集成测试
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

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use linzhi::{
  ErrorKind, Predictor, PredictorConfig,
  frame::RgbNhwcFrame,
  model::{
    DetectItem, Labels, NmsConfig, RawPredictions,
    ops::{letterbox, postprocess},
  },
  output::draw::Draw,
  run,
};

#[test]
fn missing_model_is_missing_file() {
  let dir = tempfile::tempdir().unwrap();
  let config = PredictorConfig::new(dir.path().join("best.onnx"), "video.mp4");
  let err = Predictor::new(config).err().unwrap();
  assert_eq!(err.kind(), ErrorKind::MissingFile);
}

#[test]
fn missing_labels_file_is_missing_file() {
  let mut config = PredictorConfig::new("best.onnx", "video.mp4");
  config.labels = Some(PathBuf::from("/nonexistent/names.txt"));
  let err = run(config).err().unwrap();
  assert_eq!(err.kind(), ErrorKind::MissingFile);
}

#[test]
fn pytorch_checkpoint_is_other() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("best.pt");
  std::fs::write(&path, b"weights").unwrap();
  let err = Predictor::new(PredictorConfig::new(path, "video.mp4"))
    .err()
    .unwrap();
  assert_eq!(err.kind(), ErrorKind::Other);
}

#[test]
fn label_format() {
  assert_eq!(Labels::coco().caption(0, 0.876), "person 0.88");
}

/// 构造 `[1, 4 + classes, anchors]` 的原始输出
fn raw(boxes: &[([f32; 4], u32, f32)], classes: usize) -> RawPredictions {
  let anchors = boxes.len();
  let channels = 4 + classes;
  let mut data = vec![0.0; channels * anchors];
  for (a, (cxcywh, class, score)) in boxes.iter().enumerate() {
    for c in 0..4 {
      data[c * anchors + a] = cxcywh[c];
    }
    data[(4 + *class as usize) * anchors + a] = *score;
  }
  RawPredictions::new(&[1, channels, anchors], data).unwrap()
}

#[test]
fn surviving_boxes_land_inside_original_frame() {
  // 1280x720 信箱缩放到 640x640：gain 0.5，上下各填充 140
  let image = RgbImage::new(1280, 720);
  let (_, info) = letterbox(&image, (640, 640));
  assert_eq!(info.pad, (0, 140));

  let predictions = raw(
    &[
      ([320.0, 320.0, 100.0, 100.0], 0, 0.9),
      ([100.0, 200.0, 50.0, 60.0], 2, 0.25),
      ([600.0, 480.0, 200.0, 200.0], 1, 0.249999),
      ([630.0, 150.0, 100.0, 100.0], 0, 0.7),
    ],
    3,
  );
  let out = postprocess(&predictions, &[info], &[(720, 1280)], &NmsConfig::default()).unwrap();
  assert_eq!(out.len(), 1);
  let items = &out[0];
  assert_eq!(items.len(), 3);

  for DetectItem { bbox, .. } in items {
    assert!(bbox[0] >= 0.0 && bbox[2] <= 1280.0);
    assert!(bbox[1] >= 0.0 && bbox[3] <= 720.0);
    assert!(bbox.iter().all(|v| v.fract() == 0.0));
  }
  assert_eq!(items[0].bbox, [540.0, 260.0, 740.0, 460.0]);
  assert!(items.iter().any(|i| i.class_id == 2 && i.score == 0.25));
  assert!(items.iter().all(|i| i.class_id != 1));
}

#[test]
fn annotate_empty_list_is_identity() {
  let draw = Draw::new().unwrap();
  let frame = RgbNhwcFrame::from(RgbImage::from_pixel(32, 24, Rgb([10, 20, 30])));
  let out = draw.annotate(&frame, &[], &Labels::coco()).unwrap();
  assert_eq!(out, frame);
}

/// 32x32 输入、两类 (cat, dog) 的检测模型，输出固定：
/// 一个 (16, 16, 8, 8) 的 cat 框，得分 0.9；另一个锚点低于阈值。
/// 由 `tests/fixtures/make_tiny_detect.py` 生成。
fn tiny_model() -> PathBuf {
  Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tiny_detect.onnx")
}

fn gray_frame(w: u32, h: u32) -> RgbNhwcFrame {
  RgbNhwcFrame::from(RgbImage::from_pixel(w, h, Rgb([90, 90, 90])))
}

#[test]
fn stepwise_inference_on_tiny_model() {
  let predictor = Predictor::new(PredictorConfig::new(tiny_model(), "")).unwrap();
  assert_eq!(predictor.labels().len(), 2);
  assert_eq!(predictor.labels().caption(1, 0.5), "dog 0.50");

  // 64x32 信箱缩放到 32x32：gain 0.5，上下各填充 8
  let frame = gray_frame(64, 32);
  let tensor = predictor.preprocess(&frame).unwrap();
  assert_eq!(tensor.shape(), [1, 3, 32, 32]);
  assert_eq!(tensor.letterbox()[0].pad, (0, 8));

  let raw = predictor.forward(&tensor).unwrap();
  assert_eq!(raw.batch(), 1);
  assert_eq!(raw.num_classes(), 2);
  assert_eq!(raw.anchors(), 2);

  let out = predictor.postprocess(&raw, &tensor, &[&frame]).unwrap();
  assert_eq!(out.len(), 1);
  assert_eq!(out[0].len(), 1);
  let item = &out[0][0];
  assert_eq!(item.class_id, 0);
  assert!((item.score - 0.9).abs() < 1e-6);
  assert_eq!(item.bbox, [24.0, 8.0, 40.0, 24.0]);

  let annotated = predictor.annotate(&frame, &out[0]).unwrap();
  assert_eq!(annotated.shape(), frame.shape());
  assert_ne!(annotated, frame);
  assert_eq!(predictor.annotate(&frame, &[]).unwrap(), frame);
}

#[test]
fn postprocess_with_wrong_frame_count_fails() {
  let predictor = Predictor::new(PredictorConfig::new(tiny_model(), "")).unwrap();
  let frame = gray_frame(32, 32);
  let tensor = predictor.preprocess(&frame).unwrap();
  let raw = predictor.forward(&tensor).unwrap();

  let err = predictor
    .postprocess(&raw, &tensor, &[&frame, &frame])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Other);
}

#[test]
fn predict_image_directory() {
  let dir = tempfile::tempdir().unwrap();
  gray_frame(64, 32)
    .to_rgb_image()
    .unwrap()
    .save(dir.path().join("a.png"))
    .unwrap();
  gray_frame(32, 32)
    .to_rgb_image()
    .unwrap()
    .save(dir.path().join("b.png"))
    .unwrap();

  let predictor = Predictor::new(PredictorConfig::new(tiny_model(), "")).unwrap();
  let results = predictor
    .predict(dir.path().to_str().unwrap(), false)
    .unwrap();
  assert_eq!(results.len(), 2);
  assert_eq!(results[0].frame_index, 0);
  assert_eq!(results[0].items[0].bbox, [24.0, 8.0, 40.0, 24.0]);
  assert_eq!(results[1].items[0].bbox, [12.0, 12.0, 20.0, 20.0]);
  assert_eq!(results[1].summary(), "1 cat");
}

#[test]
fn corrupt_image_source_fails_the_run() {
  let dir = tempfile::tempdir().unwrap();
  let source = dir.path().join("bus.png");
  std::fs::write(&source, b"garbage").unwrap();

  let err = run(PredictorConfig::new(tiny_model(), source.to_str().unwrap()))
    .err()
    .unwrap();
  assert_eq!(err.kind(), ErrorKind::Other);
  assert!(err.to_string().contains("bus.png"));
}

#[test]
fn missing_source_is_missing_file() {
  let dir = tempfile::tempdir().unwrap();
  let source = dir.path().join("missing.png");
  let err = run(PredictorConfig::new(tiny_model(), source.to_str().unwrap()))
    .err()
    .unwrap();
  assert_eq!(err.kind(), ErrorKind::MissingFile);
}
