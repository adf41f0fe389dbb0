// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/adapter/open_vocabulary.rs - 开放词表模型适配
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
  adapter::{AdapterError, ConversationTemplate, ModelSlot, strip_special_tokens},
  frame::Frame,
  model::{ModelBuilder, VisionLanguageModel},
};

/// 视觉语言模型适配
///
/// 只负责构造提示词并交回原始文本，解析由引擎完成。
pub struct OpenVocabularyAdapter<B: ModelBuilder> {
  slot: ModelSlot<B>,
  template: ConversationTemplate,
}

impl<B> OpenVocabularyAdapter<B>
where
  B: ModelBuilder,
  B::Model: VisionLanguageModel,
{
  pub const NAME: &'static str = "开放词表模型";

  pub fn new(builder: Option<B>) -> Self {
    Self {
      slot: ModelSlot::new(Self::NAME, builder),
      template: ConversationTemplate::default(),
    }
  }

  pub fn with_template(mut self, template: ConversationTemplate) -> Self {
    self.template = template;
    self
  }

  pub fn template(&self) -> ConversationTemplate {
    self.template
  }

  pub fn slot(&self) -> &ModelSlot<B> {
    &self.slot
  }

  pub fn generate(&self, frame: &Frame, instruction: &str) -> Result<String, AdapterError> {
    let prompt = self.template.render(instruction);
    debug!("提示词: {:?}", prompt);

    let raw = self
      .slot
      .with_model(|model| model.generate(frame.image(), &prompt))?;
    let text = strip_special_tokens(&raw);
    debug!("模型输出: {:?}", text);

    Ok(text)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use image::RgbImage;
  use thiserror::Error;

  use super::*;

  #[derive(Error, Debug)]
  #[error("generation failure")]
  struct GenerateError;

  struct EchoBuilder(Arc<Mutex<Vec<String>>>);

  struct EchoModel(Arc<Mutex<Vec<String>>>);

  impl ModelBuilder for EchoBuilder {
    type Model = EchoModel;
    type Error = GenerateError;

    fn build(&self) -> Result<Self::Model, Self::Error> {
      Ok(EchoModel(self.0.clone()))
    }
  }

  impl VisionLanguageModel for EchoModel {
    type Error = GenerateError;

    fn generate(&mut self, _image: &RgbImage, prompt: &str) -> Result<String, Self::Error> {
      self.0.lock().expect("锁").push(prompt.to_string());
      Ok("<s> <obb>[500,500,100,100,0]</obb> </s>".to_string())
    }
  }

  #[test]
  fn prompt_is_rendered_and_output_cleaned() {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let adapter = OpenVocabularyAdapter::new(Some(EchoBuilder(prompts.clone())))
      .with_template(ConversationTemplate::Plain);
    let frame = Frame::try_from(RgbImage::new(10, 10)).expect("帧");

    let text = adapter.generate(&frame, "find ships").expect("生成");
    assert_eq!(text, "<obb>[500,500,100,100,0]</obb>");
    assert_eq!(
      prompts.lock().expect("锁").as_slice(),
      ["<image>\nfind ships\n".to_string()]
    );
  }
}
