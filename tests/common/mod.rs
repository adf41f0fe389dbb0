// 该文件是 Yaogan （遥感问地） 项目的一部分。
// tests/common/mod.rs - 测试用模型替身
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

#![allow(dead_code)]

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use image::RgbImage;
use thiserror::Error;

use yaogan::{
  config::GroundingConfig,
  engine::GroundingEngine,
  model::{ModelBuilder, ObbDetector, ObbPrediction, VisionLanguageModel},
};

#[derive(Error, Debug)]
pub enum MockError {
  #[error("weights missing")]
  Build,
  #[error("out of memory")]
  Inference,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
  Ok,
  FailBuild,
  FailInference,
  Panic,
}

#[derive(Debug, Default, Clone)]
pub struct Calls {
  pub builds: Arc<AtomicUsize>,
  pub inferences: Arc<AtomicUsize>,
}

impl Calls {
  pub fn builds(&self) -> usize {
    self.builds.load(Ordering::SeqCst)
  }

  pub fn inferences(&self) -> usize {
    self.inferences.load(Ordering::SeqCst)
  }
}

pub struct MockDetectorBuilder {
  pub predictions: Vec<[f32; 6]>,
  pub behavior: Behavior,
  pub calls: Calls,
}

impl MockDetectorBuilder {
  pub fn new(predictions: Vec<[f32; 6]>) -> Self {
    Self {
      predictions,
      behavior: Behavior::Ok,
      calls: Calls::default(),
    }
  }

  /// 单个中心位于 (cx, cy) 的 100x100 目标
  pub fn single(cx: f32, cy: f32, confidence: f32) -> Self {
    Self::new(vec![[cx, cy, 100.0, 100.0, 0.0, confidence]])
  }

  pub fn with_behavior(mut self, behavior: Behavior) -> Self {
    self.behavior = behavior;
    self
  }
}

pub struct MockDetector {
  predictions: Vec<[f32; 6]>,
  behavior: Behavior,
  calls: Calls,
}

impl ModelBuilder for MockDetectorBuilder {
  type Model = MockDetector;
  type Error = MockError;

  fn build(&self) -> Result<Self::Model, Self::Error> {
    self.calls.builds.fetch_add(1, Ordering::SeqCst);
    if self.behavior == Behavior::FailBuild {
      return Err(MockError::Build);
    }
    Ok(MockDetector {
      predictions: self.predictions.clone(),
      behavior: self.behavior,
      calls: self.calls.clone(),
    })
  }
}

impl ObbDetector for MockDetector {
  type Error = MockError;

  fn predict(&mut self, _image: &RgbImage) -> Result<Vec<ObbPrediction>, Self::Error> {
    self.calls.inferences.fetch_add(1, Ordering::SeqCst);
    match self.behavior {
      Behavior::FailInference => Err(MockError::Inference),
      Behavior::Panic => panic!("detector crashed"),
      _ => Ok(self.predictions.iter().copied().map(ObbPrediction::from).collect()),
    }
  }
}

pub struct MockVlmBuilder {
  pub response: String,
  pub behavior: Behavior,
  pub calls: Calls,
}

impl MockVlmBuilder {
  pub fn new(response: impl Into<String>) -> Self {
    Self {
      response: response.into(),
      behavior: Behavior::Ok,
      calls: Calls::default(),
    }
  }

  pub fn with_behavior(mut self, behavior: Behavior) -> Self {
    self.behavior = behavior;
    self
  }
}

pub struct MockVlm {
  response: String,
  behavior: Behavior,
  calls: Calls,
}

impl ModelBuilder for MockVlmBuilder {
  type Model = MockVlm;
  type Error = MockError;

  fn build(&self) -> Result<Self::Model, Self::Error> {
    self.calls.builds.fetch_add(1, Ordering::SeqCst);
    if self.behavior == Behavior::FailBuild {
      return Err(MockError::Build);
    }
    Ok(MockVlm {
      response: self.response.clone(),
      behavior: self.behavior,
      calls: self.calls.clone(),
    })
  }
}

impl VisionLanguageModel for MockVlm {
  type Error = MockError;

  fn generate(&mut self, _image: &RgbImage, _prompt: &str) -> Result<String, Self::Error> {
    self.calls.inferences.fetch_add(1, Ordering::SeqCst);
    match self.behavior {
      Behavior::FailInference => Err(MockError::Inference),
      Behavior::Panic => panic!("generation crashed"),
      _ => Ok(format!("<s>{}</s>", self.response)),
    }
  }
}

pub type MockEngine = GroundingEngine<MockDetectorBuilder, MockVlmBuilder>;

pub fn engine(detector: Option<MockDetectorBuilder>, vlm: Option<MockVlmBuilder>) -> MockEngine {
  GroundingEngine::from_config(&GroundingConfig::default(), detector, vlm).expect("默认配置有效")
}

pub fn blank(width: u32, height: u32) -> RgbImage {
  RgbImage::new(width, height)
}

pub fn assert_polygon(actual: &[f32; 8], expected: [f32; 8]) {
  for (a, e) in actual.iter().zip(expected) {
    assert!((a - e).abs() < 1e-4, "{:?} != {:?}", actual, expected);
  }
}
