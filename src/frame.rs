// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/frame.rs - 已解码图像帧
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

use crate::input::ImageError;

/// 已解码的 RGB 图像，宽高均大于 0
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
}

impl TryFrom<RgbImage> for Frame {
  type Error = ImageError;

  fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(ImageError::Empty { width, height });
    }
    Ok(Self { image })
  }
}

impl Frame {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

#[cfg(test)]
mod tests {
  use assert_matches::assert_matches;

  use super::*;

  #[test]
  fn empty_image_is_rejected() {
    let result = Frame::try_from(RgbImage::new(0, 16));
    assert_matches!(result, Err(ImageError::Empty { width: 0, height: 16 }));
  }

  #[test]
  fn dimensions_follow_image() {
    let frame = Frame::try_from(RgbImage::new(64, 32)).expect("非空图像");
    assert_eq!(frame.dimensions(), (64, 32));
  }
}
