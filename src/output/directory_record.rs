// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::sync::{Mutex, PoisonError};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::GroundingResult,
  frame::Frame,
  output::{Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期目录记录每次查询
///
/// `folder:///records` 写入 `records/YYYY/MM/DD/HH-MM-SS-XXXX.{png,json}`。
/// 默认只记录有目标的结果，`?always` 时空结果也记录；`?raw` 时保存原图而不绘制多边形。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Option<Draw>,
  record_counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let raw = uri.query_pairs().any(|(k, _)| k == "raw");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: (!raw).then(Draw::default),
      record_counter: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn record_id(&self) -> u16 {
    let mut counter = self
      .record_counter
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn record_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }

  fn save_record(
    &self,
    path: &Path,
    frame: &Frame,
    result: &GroundingResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match &self.draw {
      Some(draw) => draw.draw_detections(frame, result).save(path)?,
      None => frame.image().save(path)?,
    }
    std::fs::write(
      path.with_extension("json"),
      serde_json::to_string_pretty(result)?,
    )?;
    debug!("记录定位结果: {}", path.display());
    Ok(())
  }
}

impl Render<Frame, GroundingResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &GroundingResult) -> Result<(), Self::Error> {
    if self.always || !result.is_empty() {
      let path = self.record_path()?;
      self.save_record(&path, frame, result)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;
  use url::Url;

  use super::*;
  use crate::{engine::Detection, geometry::Polygon};

  fn result(detections: usize) -> GroundingResult {
    GroundingResult {
      instruction: "tanks".to_string(),
      image_width: 8,
      image_height: 8,
      detections: (0..detections)
        .map(|i| Detection {
          object_id: (i + 1).to_string(),
          polygon: Polygon::clamped([0.1, 0.1, 0.5, 0.1, 0.5, 0.5, 0.1, 0.5]),
        })
        .collect(),
      outcome: None,
      error: None,
    }
  }

  fn files(dir: &Path) -> Vec<PathBuf> {
    let mut stack = vec![dir.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).expect("读取目录") {
        let path = entry.expect("目录项").path();
        if path.is_dir() {
          stack.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().expect("临时目录");
    let frame = Frame::try_from(RgbImage::new(8, 8)).expect("帧");

    let url = Url::parse(&format!("folder://{}", dir.path().display())).expect("URL");
    let output = DirectoryRecordOutput::from_url(&url).expect("输出");
    output.render_result(&frame, &result(0)).expect("记录");
    assert!(files(dir.path()).is_empty());

    output.render_result(&frame, &result(2)).expect("记录");
    let written = files(dir.path());
    assert_eq!(written.len(), 2);
    assert!(written.iter().any(|p| p.extension().is_some_and(|e| e == "json")));

    let raw_dir = dir.path().join("raw");
    let url = Url::parse(&format!("folder://{}?always&raw", raw_dir.display())).expect("URL");
    let output = DirectoryRecordOutput::from_url(&url).expect("输出");
    output.render_result(&frame, &result(0)).expect("记录");
    assert_eq!(files(&raw_dir).len(), 2);
  }
}
