// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/model.rs - 模型句柄
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

use image::RgbImage;

use crate::geometry::RotatedBox;

mod remote;
pub use self::remote::{
  RemoteModelError, RemoteObbDetector, RemoteObbDetectorBuilder, RemoteVisionLanguageBuilder,
  RemoteVisionLanguageModel,
};

/// 模型构建器，由模型槽在首次使用时调用
pub trait ModelBuilder: Send + Sync {
  type Model: Send;
  type Error: std::error::Error + Send + Sync + 'static;

  fn build(&self) -> Result<Self::Model, Self::Error>;
}

/// 旋转框检测器单个输出，像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObbPrediction {
  pub rbox: RotatedBox,
  pub confidence: f32,
}

impl From<[f32; 6]> for ObbPrediction {
  /// `[cx, cy, w, h, angle_rad, confidence]`
  fn from([cx, cy, w, h, angle, confidence]: [f32; 6]) -> Self {
    Self {
      rbox: RotatedBox::new(cx, cy, w, h, angle),
      confidence,
    }
  }
}

/// 闭集旋转框检测器
pub trait ObbDetector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn predict(&mut self, image: &RgbImage) -> Result<Vec<ObbPrediction>, Self::Error>;
}

/// 视觉语言模型，输入图像与提示词，输出解码后的文本
pub trait VisionLanguageModel {
  type Error: std::error::Error + Send + Sync + 'static;

  fn generate(&mut self, image: &RgbImage, prompt: &str) -> Result<String, Self::Error>;
}
