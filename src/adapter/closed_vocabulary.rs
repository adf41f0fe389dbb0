// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/adapter/closed_vocabulary.rs - 闭集检测器适配
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

use tracing::debug;

use crate::{
  adapter::{AdapterError, ModelSlot},
  frame::Frame,
  geometry::Polygon,
  model::{ModelBuilder, ObbDetector},
};

/// 闭集检测结果的置信度下限，低于此值的结果直接丢弃
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPolygon {
  pub polygon: Polygon,
  pub confidence: f32,
}

/// 一次快速检测的结果，按置信度降序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FastPass {
  pub detections: Vec<ScoredPolygon>,
  /// 最高置信度，无结果时为 0
  pub max_confidence: f32,
}

impl FastPass {
  pub fn into_polygons(self, max_detections: usize) -> Vec<Polygon> {
    self
      .detections
      .into_iter()
      .take(max_detections)
      .map(|d| d.polygon)
      .collect()
  }
}

/// 闭集旋转框检测器适配
///
/// 检测器只识别固定类别，定位指令不参与推理。
pub struct ClosedVocabularyAdapter<B: ModelBuilder> {
  slot: ModelSlot<B>,
  confidence_floor: f32,
}

impl<B> ClosedVocabularyAdapter<B>
where
  B: ModelBuilder,
  B::Model: ObbDetector,
{
  pub const NAME: &'static str = "闭集检测器";

  pub fn new(builder: Option<B>) -> Self {
    Self {
      slot: ModelSlot::new(Self::NAME, builder),
      confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
    }
  }

  pub fn with_confidence_floor(mut self, confidence_floor: f32) -> Self {
    self.confidence_floor = confidence_floor;
    self
  }

  pub fn confidence_floor(&self) -> f32 {
    self.confidence_floor
  }

  pub fn slot(&self) -> &ModelSlot<B> {
    &self.slot
  }

  pub fn detect(&self, frame: &Frame, _instruction: &str) -> Result<FastPass, AdapterError> {
    let predictions = self.slot.with_model(|model| model.predict(frame.image()))?;
    let total = predictions.len();

    let mut detections: Vec<ScoredPolygon> = predictions
      .into_iter()
      .filter(|p| p.confidence.is_finite() && p.confidence >= self.confidence_floor)
      .filter(|p| p.rbox.is_finite())
      .map(|p| ScoredPolygon {
        polygon: p.rbox.to_polygon(frame.width(), frame.height()),
        confidence: p.confidence.min(1.0),
      })
      .filter(|d| d.polygon.is_valid())
      .collect();
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let max_confidence = detections.first().map_or(0.0, |d| d.confidence);
    debug!(
      "闭集检测: {} 个候选, {} 个高于置信度下限, 最高置信度 {:.3}",
      total,
      detections.len(),
      max_confidence
    );

    Ok(FastPass {
      detections,
      max_confidence,
    })
  }
}

#[cfg(test)]
mod tests {
  use assert_matches::assert_matches;
  use image::RgbImage;
  use thiserror::Error;

  use super::*;
  use crate::model::ObbPrediction;

  #[derive(Error, Debug)]
  #[error("detector failure")]
  struct DetectorError;

  struct FixedBuilder(Vec<[f32; 6]>);

  struct FixedDetector(Vec<[f32; 6]>);

  impl ModelBuilder for FixedBuilder {
    type Model = FixedDetector;
    type Error = DetectorError;

    fn build(&self) -> Result<Self::Model, Self::Error> {
      Ok(FixedDetector(self.0.clone()))
    }
  }

  impl ObbDetector for FixedDetector {
    type Error = DetectorError;

    fn predict(&mut self, _image: &RgbImage) -> Result<Vec<ObbPrediction>, Self::Error> {
      Ok(self.0.iter().copied().map(ObbPrediction::from).collect())
    }
  }

  fn frame() -> Frame {
    Frame::try_from(RgbImage::new(100, 100)).expect("帧")
  }

  #[test]
  fn detections_are_filtered_and_sorted() {
    let adapter = ClosedVocabularyAdapter::new(Some(FixedBuilder(vec![
      [10.0, 10.0, 4.0, 4.0, 0.0, 0.5],
      [50.0, 50.0, 4.0, 4.0, 0.0, 0.2],
      [80.0, 80.0, 4.0, 4.0, 0.0, 0.9],
      [f32::NAN, 80.0, 4.0, 4.0, 0.0, 0.95],
    ])));

    let fast = adapter.detect(&frame(), "ignored").expect("检测");
    assert_eq!(fast.detections.len(), 2);
    assert_eq!(fast.max_confidence, 0.9);
    assert_eq!(fast.detections[0].confidence, 0.9);
    assert_eq!(fast.detections[1].confidence, 0.5);

    let polygons = fast.into_polygons(1);
    assert_eq!(polygons.len(), 1);
    assert!((polygons[0].as_array()[0] - 0.78).abs() < 1e-5);
  }

  #[test]
  fn empty_output_has_zero_confidence() {
    let adapter = ClosedVocabularyAdapter::new(Some(FixedBuilder(vec![])));
    let fast = adapter.detect(&frame(), "").expect("检测");
    assert!(fast.detections.is_empty());
    assert_eq!(fast.max_confidence, 0.0);
  }

  #[test]
  fn floor_is_configurable() {
    let adapter = ClosedVocabularyAdapter::new(Some(FixedBuilder(vec![[
      10.0, 10.0, 4.0, 4.0, 0.0, 0.2,
    ]])))
    .with_confidence_floor(0.1);
    assert_eq!(adapter.detect(&frame(), "").expect("检测").detections.len(), 1);
  }

  #[test]
  fn unconfigured_adapter_is_unavailable() {
    let adapter: ClosedVocabularyAdapter<FixedBuilder> = ClosedVocabularyAdapter::new(None);
    assert_matches!(
      adapter.detect(&frame(), ""),
      Err(AdapterError::Unavailable { .. })
    );
  }
}
