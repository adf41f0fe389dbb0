// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/registry.rs - 服务注册表
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

use std::sync::Arc;

use tracing::info;

use crate::{
  FromUrl,
  config::{ConfigError, GroundingConfig},
  engine::GroundingEngine,
  model::{
    ModelBuilder, ObbDetector, RemoteObbDetectorBuilder, RemoteVisionLanguageBuilder,
    VisionLanguageModel,
  },
};

pub type RemoteGroundingEngine = GroundingEngine<RemoteObbDetectorBuilder, RemoteVisionLanguageBuilder>;

/// 进程内共享的服务实例
///
/// 由程序启动时创建并按引用传递给各处理流程，引擎只构建一次。
pub struct ServiceRegistry<D = RemoteObbDetectorBuilder, V = RemoteVisionLanguageBuilder>
where
  D: ModelBuilder,
  V: ModelBuilder,
{
  grounding: Arc<GroundingEngine<D, V>>,
}

impl ServiceRegistry {
  /// 按配置中的服务地址创建远程模型构建器
  pub fn from_config(config: &GroundingConfig) -> Result<Self, ConfigError> {
    let closed = config
      .closed_vocabulary_model
      .as_ref()
      .map(RemoteObbDetectorBuilder::from_url)
      .transpose()?;
    let open = config
      .open_vocabulary_model
      .as_ref()
      .map(RemoteVisionLanguageBuilder::from_url)
      .transpose()?;

    Self::with_builders(config, closed, open)
  }
}

impl<D, V> ServiceRegistry<D, V>
where
  D: ModelBuilder,
  D::Model: ObbDetector,
  V: ModelBuilder,
  V::Model: VisionLanguageModel,
{
  pub fn with_builders(
    config: &GroundingConfig,
    closed: Option<D>,
    open: Option<V>,
  ) -> Result<Self, ConfigError> {
    let engine = GroundingEngine::from_config(config, closed, open)?;
    info!("定位服务已创建");
    Ok(Self {
      grounding: Arc::new(engine),
    })
  }

  pub fn grounding(&self) -> Arc<GroundingEngine<D, V>> {
    self.grounding.clone()
  }

  /// 释放模型资源，已分发的引擎引用仍可继续使用，再次使用时重新加载
  pub fn shutdown(&self) {
    info!("关闭定位服务");
    self.grounding.cleanup();
  }
}
