// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/config.rs - 定位引擎配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  adapter::{ConversationTemplate, DEFAULT_CONFIDENCE_FLOOR},
  engine::{DEFAULT_MAX_DETECTIONS, DEFAULT_SELECTION_THRESHOLD},
  model::RemoteModelError,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("{name} 必须位于 [0, 1] 区间, 实际为 {value}")]
  OutOfRange { name: &'static str, value: f32 },
  #[error("未知对话模板: {0}")]
  UnknownConversationMode(String),
  #[error("模型服务地址无效: {0}")]
  ModelEndpoint(#[from] RemoteModelError),
}

/// 定位引擎配置
///
/// ```json
/// {
///   "selection_threshold": 0.6,
///   "confidence_floor": 0.4,
///   "max_detections": 10,
///   "conv_mode": "llava_v1",
///   "closed_vocabulary_model": "obb+http://127.0.0.1:8001/",
///   "open_vocabulary_model": "vlm+http://127.0.0.1:8002/?timeout=120"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
  /// 快速检测最高置信度不低于该值时直接采用其结果
  pub selection_threshold: f32,
  pub confidence_floor: f32,
  pub max_detections: usize,
  pub conv_mode: String,
  pub closed_vocabulary_model: Option<Url>,
  pub open_vocabulary_model: Option<Url>,
}

impl Default for GroundingConfig {
  fn default() -> Self {
    Self {
      selection_threshold: DEFAULT_SELECTION_THRESHOLD,
      confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
      max_detections: DEFAULT_MAX_DETECTIONS,
      conv_mode: ConversationTemplate::default().name().to_string(),
      closed_vocabulary_model: None,
      open_vocabulary_model: None,
    }
  }
}

impl GroundingConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for (name, value) in [
      ("selection_threshold", self.selection_threshold),
      ("confidence_floor", self.confidence_floor),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange { name, value });
      }
    }
    self.conversation_template()?;
    Ok(())
  }

  pub fn conversation_template(&self) -> Result<ConversationTemplate, ConfigError> {
    self.conv_mode.parse()
  }

  pub fn with_selection_threshold(mut self, selection_threshold: f32) -> Self {
    self.selection_threshold = selection_threshold;
    self
  }

  pub fn with_confidence_floor(mut self, confidence_floor: f32) -> Self {
    self.confidence_floor = confidence_floor;
    self
  }

  pub fn with_max_detections(mut self, max_detections: usize) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn with_conv_mode(mut self, conv_mode: impl Into<String>) -> Self {
    self.conv_mode = conv_mode.into();
    self
  }

  pub fn with_closed_vocabulary_model(mut self, url: Option<Url>) -> Self {
    self.closed_vocabulary_model = url;
    self
  }

  pub fn with_open_vocabulary_model(mut self, url: Option<Url>) -> Self {
    self.open_vocabulary_model = url;
    self
  }
}

#[cfg(test)]
mod tests {
  use assert_matches::assert_matches;

  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let config = GroundingConfig::default();
    assert_eq!(config.selection_threshold, 0.6);
    assert_eq!(config.confidence_floor, 0.4);
    assert_eq!(config.max_detections, 10);
    assert_eq!(config.conv_mode, "llava_v1");
    assert!(config.validate().is_ok());
  }

  #[test]
  fn partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().expect("临时目录");
    let path = dir.path().join("grounding.json");
    std::fs::write(
      &path,
      r#"{"selection_threshold": 0.75, "open_vocabulary_model": "vlm+http://gpu:9000/"}"#,
    )
    .expect("写入配置");

    let config = GroundingConfig::from_file(&path).expect("读取配置");
    assert_eq!(config.selection_threshold, 0.75);
    assert_eq!(config.max_detections, 10);
    assert_eq!(
      config.open_vocabulary_model.as_ref().map(Url::as_str),
      Some("vlm+http://gpu:9000/")
    );
    assert_eq!(config.closed_vocabulary_model, None);
  }

  #[test]
  fn threshold_out_of_range_is_rejected() {
    let config = GroundingConfig::default().with_selection_threshold(1.5);
    assert_matches!(
      config.validate(),
      Err(ConfigError::OutOfRange { name: "selection_threshold", .. })
    );
    let config = GroundingConfig::default().with_confidence_floor(f32::NAN);
    assert_matches!(config.validate(), Err(ConfigError::OutOfRange { .. }));
  }

  #[test]
  fn unknown_conv_mode_is_rejected() {
    let config = GroundingConfig::default().with_conv_mode("chatml");
    assert_matches!(config.validate(), Err(ConfigError::UnknownConversationMode(_)));
  }
}
