// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Args;
use tracing::info;
use url::Url;

use crate::config::{ConfigError, GroundingConfig};

/// 各个程序共用的模型参数，命令行参数覆盖配置文件
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
  /// 配置文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 闭集检测服务，如 obb+http://127.0.0.1:8001/
  #[arg(long, value_name = "URL")]
  pub closed_model: Option<Url>,

  /// 开放词表模型服务，如 vlm+http://127.0.0.1:8002/?timeout=120
  #[arg(long, value_name = "URL")]
  pub open_model: Option<Url>,

  /// 选择阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub selection_threshold: Option<f32>,

  /// 闭集检测置信度下限 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence_floor: Option<f32>,

  /// 每次查询最多返回的目标数
  #[arg(long, value_name = "COUNT")]
  pub max_detections: Option<usize>,

  /// 对话模板 (llava_v1, plain)
  #[arg(long, value_name = "MODE")]
  pub conv_mode: Option<String>,

  /// 启动时预加载模型
  #[arg(long)]
  pub warm_up: bool,
}

impl ModelArgs {
  pub fn to_config(&self) -> Result<GroundingConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => GroundingConfig::from_file(path)?,
      None => GroundingConfig::default(),
    };

    if let Some(url) = &self.closed_model {
      config = config.with_closed_vocabulary_model(Some(url.clone()));
    }
    if let Some(url) = &self.open_model {
      config = config.with_open_vocabulary_model(Some(url.clone()));
    }
    if let Some(threshold) = self.selection_threshold {
      config = config.with_selection_threshold(threshold);
    }
    if let Some(floor) = self.confidence_floor {
      config = config.with_confidence_floor(floor);
    }
    if let Some(max) = self.max_detections {
      config = config.with_max_detections(max);
    }
    if let Some(mode) = &self.conv_mode {
      config = config.with_conv_mode(mode.clone());
    }

    config.validate()?;
    info!("闭集检测服务: {:?}", config.closed_vocabulary_model.as_ref().map(Url::as_str));
    info!("开放词表模型服务: {:?}", config.open_vocabulary_model.as_ref().map(Url::as_str));
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use assert_matches::assert_matches;
  use clap::Parser;

  use super::*;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(flatten)]
    model: ModelArgs,
  }

  #[test]
  fn flags_override_config_file() {
    let dir = tempfile::tempdir().expect("临时目录");
    let path = dir.path().join("grounding.json");
    std::fs::write(&path, r#"{"selection_threshold": 0.8, "max_detections": 3}"#).expect("写入");

    let cli = Cli::parse_from([
      "yaogan",
      "--config",
      path.to_str().expect("路径"),
      "--selection-threshold",
      "0.5",
      "--open-model",
      "vlm+http://localhost:9000/",
    ]);
    let config = cli.model.to_config().expect("配置");
    assert_eq!(config.selection_threshold, 0.5);
    assert_eq!(config.max_detections, 3);
    assert!(config.open_vocabulary_model.is_some());
  }

  #[test]
  fn invalid_override_is_rejected() {
    let cli = Cli::parse_from(["yaogan", "--confidence-floor", "2"]);
    assert_matches!(cli.model.to_config(), Err(ConfigError::OutOfRange { .. }));
  }
}
