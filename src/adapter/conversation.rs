// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/adapter/conversation.rs - 对话提示词模板
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

use std::{fmt, str::FromStr};

use crate::config::ConfigError;

/// 图像占位符，由模型服务替换为图像特征
pub const IMAGE_TOKEN: &str = "<image>";

const LLAVA_V1_SYSTEM: &str = "A chat between a curious human and an artificial intelligence assistant. \
The assistant gives helpful, detailed, and polite answers to the human's questions.";

const SPECIAL_TOKENS: [&str; 5] = ["<s>", "</s>", "<unk>", "<pad>", "<|endoftext|>"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationTemplate {
  /// 系统提示 + `USER:` / `ASSISTANT:` 角色
  #[default]
  LlavaV1,
  /// 仅指令，无角色
  Plain,
}

impl ConversationTemplate {
  pub fn name(&self) -> &'static str {
    match self {
      ConversationTemplate::LlavaV1 => "llava_v1",
      ConversationTemplate::Plain => "plain",
    }
  }

  /// 生成单轮提示词，指令中缺少图像占位符时在开头补上
  pub fn render(&self, instruction: &str) -> String {
    let question = if instruction.contains(IMAGE_TOKEN) {
      instruction.to_string()
    } else {
      format!("{}\n{}", IMAGE_TOKEN, instruction)
    };

    match self {
      ConversationTemplate::LlavaV1 => {
        format!("{} USER: {} ASSISTANT:", LLAVA_V1_SYSTEM, question)
      }
      ConversationTemplate::Plain => format!("{}\n", question),
    }
  }
}

impl fmt::Display for ConversationTemplate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for ConversationTemplate {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "llava_v1" => Ok(ConversationTemplate::LlavaV1),
      "plain" => Ok(ConversationTemplate::Plain),
      _ => Err(ConfigError::UnknownConversationMode(s.to_string())),
    }
  }
}

/// 去除解码文本中残留的特殊标记
pub fn strip_special_tokens(text: &str) -> String {
  let mut text = text.to_string();
  for token in SPECIAL_TOKENS {
    if text.contains(token) {
      text = text.replace(token, "");
    }
  }
  text.trim().to_string()
}
