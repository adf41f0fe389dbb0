// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/output/json_file.rs - JSON 结果输出
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
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, engine::GroundingResult, frame::Frame, output::Render};

#[derive(Error, Debug)]
pub enum JsonFileOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 将定位结果写为 JSON
///
/// `json:///out/result.json` 每次覆盖写入；加上 `?lines` 时以 JSON Lines 追加。
/// 路径为空（`json:`）时写到标准输出。
pub struct JsonFileOutput {
  path: Option<PathBuf>,
  lines: bool,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonFileOutputError::SchemeMismatch);
    }

    let path = Some(uri.path())
      .filter(|p| !p.is_empty())
      .map(PathBuf::from);
    let lines = uri.query_pairs().any(|(k, _)| k == "lines");

    Ok(JsonFileOutput { path, lines })
  }
}

impl JsonFileOutput {
  fn write(&self, path: &Path, content: &str) -> Result<(), JsonFileOutputError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    if self.lines {
      let mut file = OpenOptions::new().create(true).append(true).open(path)?;
      writeln!(file, "{}", content)?;
    } else {
      std::fs::write(path, content)?;
    }
    info!("保存定位结果到文件: {}", path.display());
    Ok(())
  }
}

impl Render<Frame, GroundingResult> for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn render_result(&self, _frame: &Frame, result: &GroundingResult) -> Result<(), Self::Error> {
    let content = if self.lines {
      serde_json::to_string(result)?
    } else {
      serde_json::to_string_pretty(result)?
    };

    match &self.path {
      Some(path) => self.write(path, &content),
      None => {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", content)?;
        Ok(())
      }
    }
  }
}
