// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/input.rs - 图像与查询输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;

use crate::{FromUrl, engine::ModelKind, frame::Frame};

mod query_manifest;
mod read_image_file;

pub use self::query_manifest::{QueryManifestError, QueryManifestInput};
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 图像加载错误，会直接返回给调用者
#[derive(Error, Debug)]
pub enum ImageError {
  #[error("图像文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像尺寸为空: {width}x{height}")]
  Empty { width: u32, height: u32 },
}

/// 图像来源
#[derive(Debug, Clone)]
pub enum ImageRef {
  Path(PathBuf),
  Bytes(Vec<u8>),
  Decoded(RgbImage),
}

impl From<&str> for ImageRef {
  fn from(path: &str) -> Self {
    ImageRef::Path(PathBuf::from(path))
  }
}

impl From<String> for ImageRef {
  fn from(path: String) -> Self {
    ImageRef::Path(PathBuf::from(path))
  }
}

impl From<PathBuf> for ImageRef {
  fn from(path: PathBuf) -> Self {
    ImageRef::Path(path)
  }
}

impl From<&Path> for ImageRef {
  fn from(path: &Path) -> Self {
    ImageRef::Path(path.to_path_buf())
  }
}

impl From<Vec<u8>> for ImageRef {
  fn from(bytes: Vec<u8>) -> Self {
    ImageRef::Bytes(bytes)
  }
}

impl From<RgbImage> for ImageRef {
  fn from(image: RgbImage) -> Self {
    ImageRef::Decoded(image)
  }
}

impl ImageRef {
  /// 用于日志的简短描述
  pub fn describe(&self) -> String {
    match self {
      ImageRef::Path(path) => path.display().to_string(),
      ImageRef::Bytes(bytes) => format!("内存 ({} 字节)", bytes.len()),
      ImageRef::Decoded(image) => format!("内存 ({}x{})", image.width(), image.height()),
    }
  }
}

/// 加载并解码图像，统一转换为 RGB8
pub fn load_image(image: ImageRef) -> Result<Frame, ImageError> {
  let rgb = match image {
    ImageRef::Path(path) => {
      if !path.exists() {
        return Err(ImageError::NotFound(path));
      }
      ImageReader::open(&path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8()
    }
    ImageRef::Bytes(bytes) => image::load_from_memory(&bytes)?.to_rgb8(),
    ImageRef::Decoded(image) => image,
  };

  Frame::try_from(rgb)
}

/// 一次定位请求
#[derive(Debug, Clone)]
pub struct Query {
  pub image: ImageRef,
  pub instruction: String,
  pub force_model: Option<ModelKind>,
  pub max_detections: Option<usize>,
}

impl Query {
  pub fn new(image: impl Into<ImageRef>, instruction: impl Into<String>) -> Self {
    Self {
      image: image.into(),
      instruction: instruction.into(),
      force_model: None,
      max_detections: None,
    }
  }

  pub fn with_force_model(mut self, force_model: Option<ModelKind>) -> Self {
    self.force_model = force_model;
    self
  }

  pub fn with_max_detections(mut self, max_detections: Option<usize>) -> Self {
    self.max_detections = max_detections;
    self
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("查询清单输入错误: {0}")]
  QueryManifestError(#[from] QueryManifestError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  QueryManifest(QueryManifestInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      QueryManifestInput::SCHEME => Ok(InputWrapper::QueryManifest(
        QueryManifestInput::from_url(url)?,
      )),
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl InputWrapper {
  /// 为单图输入设置定位指令，清单输入的每一行自带指令
  pub fn with_instruction(self, instruction: Option<String>) -> Self {
    match (self, instruction) {
      (InputWrapper::ReadImageFile(input), Some(instruction)) => {
        InputWrapper::ReadImageFile(input.with_instruction(instruction))
      }
      (input, _) => input,
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Query;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::QueryManifest(input) => input.next(),
    }
  }
}
