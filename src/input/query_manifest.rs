// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/input/query_manifest.rs - 查询清单输入
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

use std::{
  fs::File,
  io::{BufRead, BufReader, Lines},
  path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, engine::ModelKind, input::Query};

#[derive(Error, Debug)]
pub enum QueryManifestError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
  image: PathBuf,
  instruction: String,
  #[serde(default)]
  force_model: Option<String>,
  #[serde(default)]
  max_detections: Option<usize>,
}

/// JSON Lines 查询清单，每行一个查询
///
/// ```text
/// {"image": "images/P0001.png", "instruction": "Locate all storage tanks."}
/// {"image": "/data/P0002.png", "instruction": "Find the ships.", "force_model": "open", "max_detections": 5}
/// ```
///
/// 相对路径以清单所在目录为基准。空行和 `#` 开头的行被忽略，
/// 无法解析的行会记录警告并跳过。
pub struct QueryManifestInput {
  base_dir: PathBuf,
  lines: Lines<BufReader<File>>,
  line_no: usize,
}

impl FromUrlWithScheme for QueryManifestInput {
  const SCHEME: &'static str = "manifest";
}

impl FromUrl for QueryManifestInput {
  type Error = QueryManifestError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(QueryManifestError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl QueryManifestInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, QueryManifestError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_default();
    debug!("打开查询清单: {}", path.display());

    Ok(Self {
      base_dir,
      lines: BufReader::new(file).lines(),
      line_no: 0,
    })
  }

  fn parse_line(&self, line: &str) -> Option<Query> {
    let entry: ManifestEntry = match serde_json::from_str(line) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("清单第 {} 行解析失败: {}", self.line_no, e);
        return None;
      }
    };

    let force_model = match entry.force_model.as_deref().map(str::parse::<ModelKind>) {
      None => None,
      Some(Ok(kind)) => Some(kind),
      Some(Err(e)) => {
        warn!("清单第 {} 行模型名称无效: {}", self.line_no, e);
        return None;
      }
    };

    let image = if entry.image.is_relative() {
      self.base_dir.join(entry.image)
    } else {
      entry.image
    };

    Some(
      Query::new(image, entry.instruction)
        .with_force_model(force_model)
        .with_max_detections(entry.max_detections),
    )
  }
}

impl Iterator for QueryManifestInput {
  type Item = Query;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let line = match self.lines.next()? {
        Ok(line) => line,
        Err(e) => {
          error!("读取查询清单失败: {}", e);
          return None;
        }
      };
      self.line_no += 1;

      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      if let Some(query) = self.parse_line(line) {
        return Some(query);
      }
    }
  }
}
