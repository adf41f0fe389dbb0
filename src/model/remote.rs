// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/model/remote.rs - 远程 HTTP 推理服务
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

use std::{io::Cursor, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ImageFormat, RgbImage};
use reqwest::{
  blocking::{Client, Response},
  header::CONTENT_TYPE,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  model::{ModelBuilder, ObbDetector, ObbPrediction, VisionLanguageModel},
};

const OBB_SCHEME_PREFIX: &str = "obb+";
const VLM_SCHEME_PREFIX: &str = "vlm+";
const VLM_MAX_NEW_TOKENS: u32 = 512;

#[derive(Error, Debug)]
pub enum RemoteModelError {
  #[error("URI 方案不匹配: 期望 '{expected}http(s)', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("服务地址无效: {0}")]
  InvalidUrl(String),
  #[error("HTTP 请求失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("图像编码失败: {0}")]
  Encode(#[from] image::ImageError),
  #[error("服务状态异常 ({status}): {body}")]
  Api { status: u16, body: String },
  #[error("服务响应无效: {0}")]
  InvalidResponse(String),
}

/// 解析 `<prefix>http(s)://host/base?timeout=<secs>`，返回以 `/` 结尾的服务基地址
fn parse_endpoint(
  url: &Url,
  prefix: &'static str,
) -> Result<(Url, Option<Duration>), RemoteModelError> {
  let scheme = url.scheme();
  let inner = scheme
    .strip_prefix(prefix)
    .filter(|s| *s == "http" || *s == "https")
    .ok_or_else(|| RemoteModelError::SchemeMismatch {
      expected: prefix,
      found: scheme.to_string(),
    })?;

  let mut timeout = None;
  for (k, v) in url.query_pairs() {
    if k == "timeout" {
      let secs = v
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s > 0.0)
        .ok_or_else(|| RemoteModelError::InvalidUrl(format!("超时时间无效: {}", v)))?;
      timeout = Some(Duration::from_secs_f64(secs));
    }
  }

  let rest = &url.as_str()[scheme.len()..];
  let mut base = Url::parse(&format!("{}{}", inner, rest))
    .map_err(|e| RemoteModelError::InvalidUrl(e.to_string()))?;
  base.set_query(None);
  base.set_fragment(None);
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }

  Ok((base, timeout))
}

fn endpoint(base: &Url, name: &str) -> Result<Url, RemoteModelError> {
  base
    .join(name)
    .map_err(|e| RemoteModelError::InvalidUrl(e.to_string()))
}

fn build_client(timeout: Option<Duration>) -> Result<Client, RemoteModelError> {
  // 阻塞客户端默认 30 秒超时，未指定时不限时
  Ok(Client::builder().timeout(timeout).build()?)
}

fn ensure_success(response: Response) -> Result<Response, RemoteModelError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().unwrap_or_default();
  Err(RemoteModelError::Api {
    status: status.as_u16(),
    body,
  })
}

fn check_health(client: &Client, base: &Url) -> Result<(), RemoteModelError> {
  let url = endpoint(base, "health")?;
  debug!("检查推理服务状态: {}", url);
  ensure_success(client.get(url).send()?)?;
  Ok(())
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, RemoteModelError> {
  let mut buf = Cursor::new(Vec::new());
  image.write_to(&mut buf, ImageFormat::Png)?;
  Ok(buf.into_inner())
}

/// 远程旋转框检测服务
///
/// `obb+http://host:port/base?timeout=30`，构建时探测 `GET {base}/health`。
#[derive(Debug, Clone)]
pub struct RemoteObbDetectorBuilder {
  base: Url,
  timeout: Option<Duration>,
}

impl FromUrl for RemoteObbDetectorBuilder {
  type Error = RemoteModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let (base, timeout) = parse_endpoint(url, OBB_SCHEME_PREFIX)?;
    Ok(Self { base, timeout })
  }
}

impl RemoteObbDetectorBuilder {
  pub fn base(&self) -> &Url {
    &self.base
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }
}

impl ModelBuilder for RemoteObbDetectorBuilder {
  type Model = RemoteObbDetector;
  type Error = RemoteModelError;

  fn build(&self) -> Result<Self::Model, Self::Error> {
    info!("连接旋转框检测服务: {}", self.base);
    let client = build_client(self.timeout)?;
    check_health(&client, &self.base)?;
    let predict_url = endpoint(&self.base, "predict")?;
    info!("旋转框检测服务就绪");

    Ok(RemoteObbDetector {
      client,
      predict_url,
    })
  }
}

pub struct RemoteObbDetector {
  client: Client,
  predict_url: Url,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
  predictions: Vec<Vec<f32>>,
}

impl ObbDetector for RemoteObbDetector {
  type Error = RemoteModelError;

  fn predict(&mut self, image: &RgbImage) -> Result<Vec<ObbPrediction>, Self::Error> {
    let body = encode_png(image)?;
    let response = self
      .client
      .post(self.predict_url.clone())
      .header(CONTENT_TYPE, "image/png")
      .body(body)
      .send()?;
    let response: PredictResponse = ensure_success(response)?.json()?;

    response
      .predictions
      .into_iter()
      .map(|row| {
        <[f32; 6]>::try_from(row.as_slice())
          .map(ObbPrediction::from)
          .map_err(|_| {
            error!("检测结果长度错误: {:?}", row);
            RemoteModelError::InvalidResponse(format!("每个检测结果应有 6 个数值, 实际 {}", row.len()))
          })
      })
      .collect()
  }
}

/// 远程视觉语言模型服务
///
/// `vlm+http://host:port/base?timeout=120`，构建时探测 `GET {base}/health`。
#[derive(Debug, Clone)]
pub struct RemoteVisionLanguageBuilder {
  base: Url,
  timeout: Option<Duration>,
}

impl FromUrl for RemoteVisionLanguageBuilder {
  type Error = RemoteModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let (base, timeout) = parse_endpoint(url, VLM_SCHEME_PREFIX)?;
    Ok(Self { base, timeout })
  }
}

impl RemoteVisionLanguageBuilder {
  pub fn base(&self) -> &Url {
    &self.base
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }
}

impl ModelBuilder for RemoteVisionLanguageBuilder {
  type Model = RemoteVisionLanguageModel;
  type Error = RemoteModelError;

  fn build(&self) -> Result<Self::Model, Self::Error> {
    info!("连接视觉语言模型服务: {}", self.base);
    let client = build_client(self.timeout)?;
    check_health(&client, &self.base)?;
    let generate_url = endpoint(&self.base, "generate")?;
    info!("视觉语言模型服务就绪");

    Ok(RemoteVisionLanguageModel {
      client,
      generate_url,
    })
  }
}

pub struct RemoteVisionLanguageModel {
  client: Client,
  generate_url: Url,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
  prompt: &'a str,
  image: String,
  max_new_tokens: u32,
  do_sample: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
  text: String,
}

impl VisionLanguageModel for RemoteVisionLanguageModel {
  type Error = RemoteModelError;

  fn generate(&mut self, image: &RgbImage, prompt: &str) -> Result<String, Self::Error> {
    let request = GenerateRequest {
      prompt,
      image: STANDARD.encode(encode_png(image)?),
      max_new_tokens: VLM_MAX_NEW_TOKENS,
      do_sample: false,
    };
    let response = self
      .client
      .post(self.generate_url.clone())
      .json(&request)
      .send()?;
    let response: GenerateResponse = ensure_success(response)?.json()?;
    Ok(response.text)
  }
}

#[cfg(test)]
mod tests {
  use assert_matches::assert_matches;

  use super::*;

  #[test]
  fn obb_url_is_rewritten_to_http_base() {
    let url = Url::parse("obb+http://127.0.0.1:8000/models/obb?timeout=2.5").expect("URL");
    let builder = RemoteObbDetectorBuilder::from_url(&url).expect("构建器");
    assert_eq!(builder.base().as_str(), "http://127.0.0.1:8000/models/obb/");
    assert_eq!(builder.timeout(), Some(Duration::from_millis(2500)));
    assert_eq!(
      endpoint(builder.base(), "predict").expect("地址").as_str(),
      "http://127.0.0.1:8000/models/obb/predict"
    );
  }

  #[test]
  fn vlm_url_without_path_keeps_root() {
    let url = Url::parse("vlm+https://gpu.example.com").expect("URL");
    let builder = RemoteVisionLanguageBuilder::from_url(&url).expect("构建器");
    assert_eq!(builder.base().as_str(), "https://gpu.example.com/");
    assert_eq!(builder.timeout(), None);
  }

  #[test]
  fn prefixes_are_not_interchangeable() {
    let url = Url::parse("vlm+http://localhost:9000").expect("URL");
    assert_matches!(
      RemoteObbDetectorBuilder::from_url(&url),
      Err(RemoteModelError::SchemeMismatch { expected: "obb+", .. })
    );
  }

  #[test]
  fn bad_timeout_is_rejected() {
    let url = Url::parse("obb+http://localhost:9000?timeout=-1").expect("URL");
    assert_matches!(
      RemoteObbDetectorBuilder::from_url(&url),
      Err(RemoteModelError::InvalidUrl(_))
    );
  }

  #[test]
  fn prediction_rows_map_to_rotated_boxes() {
    let prediction = ObbPrediction::from([10.0, 20.0, 4.0, 2.0, 0.5, 0.9]);
    assert_eq!(prediction.rbox.cx, 10.0);
    assert_eq!(prediction.rbox.angle, 0.5);
    assert_eq!(prediction.confidence, 0.9);
  }

  fn obb_builder(server: &mockito::Server) -> RemoteObbDetectorBuilder {
    let url = Url::parse(&format!("obb+{}/obb", server.url())).expect("URL");
    RemoteObbDetectorBuilder::from_url(&url).expect("构建器")
  }

  fn vlm_builder(server: &mockito::Server) -> RemoteVisionLanguageBuilder {
    let url = Url::parse(&format!("vlm+{}/vlm", server.url())).expect("URL");
    RemoteVisionLanguageBuilder::from_url(&url).expect("构建器")
  }

  #[test]
  fn detector_posts_png_and_reads_predictions() {
    let mut server = mockito::Server::new();
    let health = server.mock("GET", "/obb/health").with_status(200).create();
    let predict = server
      .mock("POST", "/obb/predict")
      .match_header("content-type", "image/png")
      .with_header("content-type", "application/json")
      .with_body(r#"{"predictions": [[10, 20, 4, 6, 0.5, 0.9], [1, 2, 3, 4, 0, 0.1]]}"#)
      .create();

    let mut detector = obb_builder(&server).build().expect("连接");
    let predictions = detector.predict(&RgbImage::new(8, 8)).expect("推理");

    health.assert();
    predict.assert();
    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].rbox.cy, 20.0);
    assert_eq!(predictions[0].rbox.angle, 0.5);
    assert_eq!(predictions[1].confidence, 0.1);
  }

  #[test]
  fn short_prediction_row_is_invalid() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/obb/health").with_status(200).create();
    server
      .mock("POST", "/obb/predict")
      .with_header("content-type", "application/json")
      .with_body(r#"{"predictions": [[10, 20, 4, 6, 0.9]]}"#)
      .create();

    let mut detector = obb_builder(&server).build().expect("连接");
    assert_matches!(
      detector.predict(&RgbImage::new(8, 8)),
      Err(RemoteModelError::InvalidResponse(_))
    );
  }

  #[test]
  fn error_status_carries_body() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/obb/health").with_status(200).create();
    server
      .mock("POST", "/obb/predict")
      .with_status(500)
      .with_body("model crashed")
      .create();

    let mut detector = obb_builder(&server).build().expect("连接");
    assert_matches!(
      detector.predict(&RgbImage::new(8, 8)),
      Err(RemoteModelError::Api { status: 500, body }) if body == "model crashed"
    );
  }

  #[test]
  fn unhealthy_service_fails_to_build() {
    let mut server = mockito::Server::new();
    let health = server.mock("GET", "/vlm/health").with_status(503).create();

    let result = vlm_builder(&server).build();
    health.assert();
    assert!(matches!(result, Err(RemoteModelError::Api { status: 503, .. })));
  }

  #[test]
  fn generate_sends_prompt_and_encoded_image() {
    let mut server = mockito::Server::new();
    server.mock("GET", "/vlm/health").with_status(200).create();
    let generate = server
      .mock("POST", "/vlm/generate")
      .match_header("content-type", "application/json")
      .match_body(mockito::Matcher::AllOf(vec![
        mockito::Matcher::PartialJson(serde_json::json!({
          "prompt": "USER: <image>\nfind ships ASSISTANT:",
          "max_new_tokens": 512,
          "do_sample": false,
        })),
        // PNG 文件头的 base64 编码
        mockito::Matcher::Regex(r#""image":"iVBORw0KGgo"#.to_string()),
      ]))
      .with_header("content-type", "application/json")
      .with_body(r#"{"text": "<obb>[500,500,100,100,0]</obb>"}"#)
      .create();

    let mut model = vlm_builder(&server).build().expect("连接");
    let text = model
      .generate(&RgbImage::new(8, 8), "USER: <image>\nfind ships ASSISTANT:")
      .expect("生成");

    generate.assert();
    assert_eq!(text, "<obb>[500,500,100,100,0]</obb>");
  }
}
