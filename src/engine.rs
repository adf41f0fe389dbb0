// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/engine.rs - 混合定位决策引擎
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

//! # 混合定位决策引擎
//!
//! 每次查询先由闭集检测器做快速检测，最高置信度达到选择阈值时直接采用，
//! 否则交给开放词表模型，并解析其文本输出。两个模型的结果从不合并。
//!
//! ```text
//! Idle ─┬─> FastPass ─┬─> Accepted ──────────────┐
//!       │             └─> Fallback ──────────────┼─> Done
//!       └─> Forced(kind) ────────────────────────┘
//! ```
//!
//! 适配器内的错误都在引擎边界被捕获：记录日志、计入失败次数并返回空结果。
//! 只有图像加载失败会返回给调用者。

use std::{fmt, str::FromStr, sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  adapter::{AdapterError, ClosedVocabularyAdapter, FastPass, OpenVocabularyAdapter},
  config::{ConfigError, GroundingConfig},
  frame::Frame,
  geometry::Polygon,
  input::{ImageError, ImageRef, Query, load_image},
  model::{ModelBuilder, ObbDetector, VisionLanguageModel},
  parser::ResponseParser,
};

mod statistics;
pub use self::statistics::{ServiceStatistics, StatisticsSnapshot};

/// 快速检测结果被直接采用所需的最低置信度
pub const DEFAULT_SELECTION_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MAX_DETECTIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
  ClosedVocabulary,
  OpenVocabulary,
}

impl ModelKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ModelKind::ClosedVocabulary => "closed_vocabulary",
      ModelKind::OpenVocabulary => "open_vocabulary",
    }
  }
}

impl fmt::Display for ModelKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("未知模型类型: {0}")]
pub struct UnknownModelKind(pub String);

impl FromStr for ModelKind {
  type Err = UnknownModelKind;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "yolo" | "closed" | "closed_vocabulary" => Ok(ModelKind::ClosedVocabulary),
      "geoground" | "open" | "open_vocabulary" => Ok(ModelKind::OpenVocabulary),
      _ => Err(UnknownModelKind(s.to_string())),
    }
  }
}

/// 记录本次查询由哪个模型给出结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionOutcome {
  pub chosen_model: ModelKind,
  /// 快速检测的最高置信度，未执行或不可用时为 0
  pub closed_vocabulary_confidence: f32,
  pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  /// 按输出顺序从 1 开始编号
  pub object_id: String,
  pub polygon: Polygon,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingResult {
  pub instruction: String,
  pub image_width: u32,
  pub image_height: u32,
  pub detections: Vec<Detection>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub outcome: Option<SelectionOutcome>,
  /// 推理失败时的错误描述
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl GroundingResult {
  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn is_failure(&self) -> bool {
    self.error.is_some()
  }
}

enum Stage {
  Idle,
  FastPass,
  Forced(ModelKind),
  Accepted(FastPass),
  Fallback { fast: Option<FastPass> },
  Done(Resolution),
}

enum Resolution {
  Detections {
    outcome: SelectionOutcome,
    polygons: Vec<Polygon>,
  },
  Failed(AdapterError),
}

/// 能够执行定位查询的服务，由任务运行器使用
pub trait Grounder {
  fn ground(&self, query: Query) -> Result<(Frame, GroundingResult), ImageError>;
  fn statistics(&self) -> StatisticsSnapshot;
}

pub struct GroundingEngine<D: ModelBuilder, V: ModelBuilder> {
  closed: ClosedVocabularyAdapter<D>,
  open: OpenVocabularyAdapter<V>,
  selection_threshold: f32,
  max_detections: usize,
  statistics: ServiceStatistics,
}

impl<D, V> GroundingEngine<D, V>
where
  D: ModelBuilder,
  D::Model: ObbDetector,
  V: ModelBuilder,
  V::Model: VisionLanguageModel,
{
  pub fn new(closed: ClosedVocabularyAdapter<D>, open: OpenVocabularyAdapter<V>) -> Self {
    Self {
      closed,
      open,
      selection_threshold: DEFAULT_SELECTION_THRESHOLD,
      max_detections: DEFAULT_MAX_DETECTIONS,
      statistics: ServiceStatistics::default(),
    }
  }

  /// 按配置创建引擎，未提供的构建器对应的模型视为不可用
  pub fn from_config(
    config: &GroundingConfig,
    closed: Option<D>,
    open: Option<V>,
  ) -> Result<Self, ConfigError> {
    config.validate()?;
    let template = config.conversation_template()?;

    let closed = ClosedVocabularyAdapter::new(closed).with_confidence_floor(config.confidence_floor);
    let open = OpenVocabularyAdapter::new(open).with_template(template);
    info!(
      "定位引擎配置: 选择阈值 {}, 置信度下限 {}, 最多 {} 个目标, 对话模板 {}",
      config.selection_threshold, config.confidence_floor, config.max_detections, template
    );

    Ok(
      Self::new(closed, open)
        .with_selection_threshold(config.selection_threshold)
        .with_max_detections(config.max_detections),
    )
  }

  pub fn with_selection_threshold(mut self, selection_threshold: f32) -> Self {
    self.selection_threshold = selection_threshold;
    self
  }

  pub fn with_max_detections(mut self, max_detections: usize) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn selection_threshold(&self) -> f32 {
    self.selection_threshold
  }

  pub fn closed_vocabulary(&self) -> &ClosedVocabularyAdapter<D> {
    &self.closed
  }

  pub fn open_vocabulary(&self) -> &OpenVocabularyAdapter<V> {
    &self.open
  }

  /// 检测图像中与指令相符的目标
  ///
  /// 图像无法加载时返回错误，推理层面的失败只会得到空列表。
  pub fn detect_objects(
    &self,
    image: impl Into<ImageRef>,
    instruction: &str,
    force_model: Option<ModelKind>,
    max_detections: Option<usize>,
  ) -> Result<Vec<Detection>, ImageError> {
    self
      .detect_objects_with_outcome(image, instruction, force_model, max_detections)
      .map(|result| result.detections)
  }

  /// 与 [`Self::detect_objects`] 相同，同时返回模型选择信息
  pub fn detect_objects_with_outcome(
    &self,
    image: impl Into<ImageRef>,
    instruction: &str,
    force_model: Option<ModelKind>,
    max_detections: Option<usize>,
  ) -> Result<GroundingResult, ImageError> {
    let frame = self.load_frame(image.into())?;
    Ok(self.detect_frame(&frame, instruction, force_model, max_detections))
  }

  pub fn detect_query(&self, query: Query) -> Result<(Frame, GroundingResult), ImageError> {
    let frame = self.load_frame(query.image)?;
    let result = self.detect_frame(
      &frame,
      &query.instruction,
      query.force_model,
      query.max_detections,
    );
    Ok((frame, result))
  }

  fn load_frame(&self, image: ImageRef) -> Result<Frame, ImageError> {
    let source = image.describe();
    load_image(image).inspect_err(|e| {
      error!("加载图像 {} 失败: {}", source, e);
      self.statistics.record_failure();
    })
  }

  /// 对已解码的图像执行一次定位查询
  pub fn detect_frame(
    &self,
    frame: &Frame,
    instruction: &str,
    force_model: Option<ModelKind>,
    max_detections: Option<usize>,
  ) -> GroundingResult {
    let max_detections = max_detections.unwrap_or(self.max_detections);
    let started = Instant::now();
    info!(
      "定位查询: {:?} ({}x{})",
      instruction,
      frame.width(),
      frame.height()
    );

    let mut result = GroundingResult {
      instruction: instruction.to_string(),
      image_width: frame.width(),
      image_height: frame.height(),
      detections: Vec::new(),
      outcome: None,
      error: None,
    };

    match self.resolve(frame, instruction, force_model, max_detections) {
      Resolution::Detections { outcome, polygons } => {
        result.detections = polygons
          .into_iter()
          .enumerate()
          .map(|(i, polygon)| Detection {
            object_id: (i + 1).to_string(),
            polygon,
          })
          .collect();
        self
          .statistics
          .record_success(outcome.chosen_model, result.detections.len());
        info!(
          "定位完成: {} 给出 {} 个目标, 耗时 {:.2?}",
          outcome.chosen_model,
          result.detections.len(),
          started.elapsed()
        );
        result.outcome = Some(outcome);
      }
      Resolution::Failed(e) => {
        error!("定位查询失败: {}", e);
        self.statistics.record_failure();
        result.error = Some(e.to_string());
      }
    }

    result
  }

  fn resolve(
    &self,
    frame: &Frame,
    instruction: &str,
    force_model: Option<ModelKind>,
    max_detections: usize,
  ) -> Resolution {
    let mut stage = Stage::Idle;
    loop {
      stage = match stage {
        Stage::Idle => match force_model {
          Some(kind) => {
            debug!("指定使用 {}", kind);
            Stage::Forced(kind)
          }
          None => Stage::FastPass,
        },

        Stage::FastPass => match self.closed.detect(frame, instruction) {
          Ok(fast) if fast.max_confidence >= self.selection_threshold => Stage::Accepted(fast),
          Ok(fast) => {
            info!(
              "快速检测最高置信度 {:.3} 低于阈值 {}, 改用开放词表模型",
              fast.max_confidence, self.selection_threshold
            );
            Stage::Fallback { fast: Some(fast) }
          }
          Err(e) if e.is_unavailable() => {
            debug!("{}, 直接使用开放词表模型", e);
            Stage::Fallback { fast: None }
          }
          Err(e) => Stage::Done(Resolution::Failed(e)),
        },

        Stage::Forced(ModelKind::ClosedVocabulary) => match self.closed.detect(frame, instruction) {
          Ok(fast) => Stage::Done(Resolution::Detections {
            outcome: SelectionOutcome {
              chosen_model: ModelKind::ClosedVocabulary,
              closed_vocabulary_confidence: fast.max_confidence,
              forced: true,
            },
            polygons: fast.into_polygons(max_detections),
          }),
          Err(e) => Stage::Done(Resolution::Failed(e)),
        },

        Stage::Forced(ModelKind::OpenVocabulary) => {
          match self.open_pass(frame, instruction, max_detections) {
            Ok(polygons) => Stage::Done(Resolution::Detections {
              outcome: SelectionOutcome {
                chosen_model: ModelKind::OpenVocabulary,
                closed_vocabulary_confidence: 0.0,
                forced: true,
              },
              polygons,
            }),
            Err(e) => Stage::Done(Resolution::Failed(e)),
          }
        }

        Stage::Accepted(fast) => Stage::Done(Resolution::Detections {
          outcome: SelectionOutcome {
            chosen_model: ModelKind::ClosedVocabulary,
            closed_vocabulary_confidence: fast.max_confidence,
            forced: false,
          },
          polygons: fast.into_polygons(max_detections),
        }),

        Stage::Fallback { fast } => {
          let confidence = fast.as_ref().map_or(0.0, |f| f.max_confidence);
          match (self.open_pass(frame, instruction, max_detections), fast) {
            (Ok(polygons), _) => Stage::Done(Resolution::Detections {
              outcome: SelectionOutcome {
                chosen_model: ModelKind::OpenVocabulary,
                closed_vocabulary_confidence: confidence,
                forced: false,
              },
              polygons,
            }),
            (Err(e), Some(fast)) if e.is_unavailable() => {
              debug!("{}, 退回快速检测结果", e);
              Stage::Done(Resolution::Detections {
                outcome: SelectionOutcome {
                  chosen_model: ModelKind::ClosedVocabulary,
                  closed_vocabulary_confidence: confidence,
                  forced: false,
                },
                polygons: fast.into_polygons(max_detections),
              })
            }
            (Err(e), _) => Stage::Done(Resolution::Failed(e)),
          }
        }

        Stage::Done(resolution) => return resolution,
      };
    }
  }

  fn open_pass(
    &self,
    frame: &Frame,
    instruction: &str,
    max_detections: usize,
  ) -> Result<Vec<Polygon>, AdapterError> {
    let text = self.open.generate(frame, instruction)?;
    let parsed = ResponseParser::new(frame.width(), frame.height(), max_detections).parse(&text);
    Ok(parsed.polygons)
  }

  pub fn statistics(&self) -> StatisticsSnapshot {
    self.statistics.snapshot(
      self.closed.slot().is_loaded(),
      self.open.slot().is_loaded(),
    )
  }

  pub fn reset_statistics(&self) {
    info!("重置统计数据");
    self.statistics.reset();
  }

  pub fn reload_closed_vocabulary(&self) -> Result<(), AdapterError> {
    self.closed.slot().reload()
  }

  pub fn reload_open_vocabulary(&self) -> Result<(), AdapterError> {
    self.open.slot().reload()
  }

  /// 预先加载两个模型，加载失败只记录日志
  pub fn warm_up(&self) {
    for result in [self.closed.slot().warm_up(), self.open.slot().warm_up()] {
      if let Err(e) = result {
        warn!("预加载失败: {}", e);
      }
    }
  }

  /// 输出最终统计并释放两个模型，可重复调用
  pub fn cleanup(&self) {
    match serde_json::to_string_pretty(&self.statistics()) {
      Ok(stats) => info!("最终统计:\n{}", stats),
      Err(e) => warn!("统计数据序列化失败: {}", e),
    }
    self.closed.slot().release();
    self.open.slot().release();
  }
}

impl<D, V> Grounder for GroundingEngine<D, V>
where
  D: ModelBuilder,
  D::Model: ObbDetector,
  V: ModelBuilder,
  V::Model: VisionLanguageModel,
{
  fn ground(&self, query: Query) -> Result<(Frame, GroundingResult), ImageError> {
    self.detect_query(query)
  }

  fn statistics(&self) -> StatisticsSnapshot {
    GroundingEngine::statistics(self)
  }
}

impl<G: Grounder + ?Sized> Grounder for Arc<G> {
  fn ground(&self, query: Query) -> Result<(Frame, GroundingResult), ImageError> {
    (**self).ground(query)
  }

  fn statistics(&self) -> StatisticsSnapshot {
    (**self).statistics()
  }
}

impl<G: Grounder + ?Sized> Grounder for &G {
  fn ground(&self, query: Query) -> Result<(Frame, GroundingResult), ImageError> {
    (**self).ground(query)
  }

  fn statistics(&self) -> StatisticsSnapshot {
    (**self).statistics()
  }
}
