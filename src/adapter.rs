// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/adapter.rs - 检测器适配层
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

use thiserror::Error;

mod closed_vocabulary;
mod conversation;
mod open_vocabulary;
mod slot;

pub use self::closed_vocabulary::{
  ClosedVocabularyAdapter, DEFAULT_CONFIDENCE_FLOOR, FastPass, ScoredPolygon,
};
pub use self::conversation::{ConversationTemplate, IMAGE_TOKEN, strip_special_tokens};
pub use self::open_vocabulary::OpenVocabularyAdapter;
pub use self::slot::ModelSlot;

#[derive(Error, Debug)]
pub enum AdapterError {
  #[error("{adapter} 不可用: {reason}")]
  Unavailable { adapter: &'static str, reason: String },
  #[error("{adapter} 推理失败: {source}")]
  Inference {
    adapter: &'static str,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

impl AdapterError {
  pub fn is_unavailable(&self) -> bool {
    matches!(self, AdapterError::Unavailable { .. })
  }

  pub fn adapter(&self) -> &'static str {
    match self {
      AdapterError::Unavailable { adapter, .. } | AdapterError::Inference { adapter, .. } => adapter,
    }
  }
}
