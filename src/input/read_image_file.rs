// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/input/read_image_file.rs - 单图查询输入
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

use thiserror::Error;
use tracing::{error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, engine::ModelKind, input::Query};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
}

/// 单张图像文件，产生一次查询
///
/// URL 形如 `image:///data/scene.png?instruction=...&force_model=open&max_detections=5`。
pub struct ImageFileInput {
  query: Option<Query>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut instruction = String::new();
    let mut force_model = None;
    let mut max_detections = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "instruction" => instruction = v.into_owned(),
        "force_model" => {
          let kind = v
            .parse::<ModelKind>()
            .map_err(|e| ImageFileInputError::InvalidParameter("force_model", e.to_string()))?;
          force_model = Some(kind);
        }
        "max_detections" => {
          let max = v
            .parse::<usize>()
            .map_err(|e| ImageFileInputError::InvalidParameter("max_detections", e.to_string()))?;
          max_detections = Some(max);
        }
        other => warn!("忽略未知参数: {}", other),
      }
    }

    let query = Query::new(PathBuf::from(url.path()), instruction)
      .with_force_model(force_model)
      .with_max_detections(max_detections);

    Ok(ImageFileInput { query: Some(query) })
  }
}

impl ImageFileInput {
  pub fn with_instruction(mut self, instruction: String) -> Self {
    if let Some(query) = self.query.as_mut() {
      query.instruction = instruction;
    }
    self
  }
}

impl Iterator for ImageFileInput {
  type Item = Query;

  fn next(&mut self) -> Option<Self::Item> {
    self.query.take()
  }
}
