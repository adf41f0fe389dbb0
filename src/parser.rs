// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/parser.rs - 开放词表模型输出解析
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

//! # 模型输出解析
//!
//! 开放词表模型以自由文本形式给出目标框，本模块按固定优先级尝试以下格式，
//! 第一个产生有效结果的格式即为最终结果：
//!
//! 1. `<obb>[cx, cy, w, h, angle]</obb>` 旋转框，角度单位为度
//! 2. `<hbb>[x1, y1, x2, y2]</hbb>` 轴对齐框
//! 3. 文本中任意被方括号或圆括号包围的 4 或 5 个数字
//!
//! 所有数值均位于 `0..=1000` 的协议坐标系中（见 [`COORDINATE_SCALE`]），
//! 按图像尺寸换算为像素后再转换为归一化多边形。

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::geometry::{Polygon, RotatedBox};

/// 模型输出坐标的协议量程
///
/// 提示词约定模型以 0 到 1000 的整数刻度描述坐标，与图像实际分辨率无关。
pub const COORDINATE_SCALE: f32 = 1000.0;

static TAGGED_ORIENTED: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)<obb>\s*\[([^\]]+)\]\s*</obb>").expect("旋转框正则表达式无效")
});

static TAGGED_AXIS_ALIGNED: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)<hbb>\s*\[([^\]]+)\]\s*</hbb>").expect("轴对齐框正则表达式无效")
});

static BARE_NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"[\[\(]\s*(-?\d+(?:\.\d*)?(?:\s*,\s*-?\d+(?:\.\d*)?){3,4})\s*[\]\)]")
    .expect("数字序列正则表达式无效")
});

/// 解析策略，按优先级排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
  TaggedOriented,
  TaggedAxisAligned,
  BareNumeric,
}

impl ParseStrategy {
  pub const PRIORITY: [ParseStrategy; 3] = [
    ParseStrategy::TaggedOriented,
    ParseStrategy::TaggedAxisAligned,
    ParseStrategy::BareNumeric,
  ];

  fn pattern(&self) -> &'static Regex {
    match self {
      ParseStrategy::TaggedOriented => &TAGGED_ORIENTED,
      ParseStrategy::TaggedAxisAligned => &TAGGED_AXIS_ALIGNED,
      ParseStrategy::BareNumeric => &BARE_NUMERIC,
    }
  }

  /// 将一组协议坐标转换为像素旋转框，数值不足时返回 None
  fn to_rotated_box(
    self,
    values: &[f32],
    image_width: u32,
    image_height: u32,
  ) -> Option<RotatedBox> {
    let (img_w, img_h) = (image_width as f32, image_height as f32);
    let oriented = match self {
      ParseStrategy::TaggedOriented => true,
      ParseStrategy::TaggedAxisAligned => false,
      ParseStrategy::BareNumeric => values.len() >= 5,
    };

    if oriented {
      let [cx, cy, w, h, angle_deg]: [f32; 5] = values.get(..5)?.try_into().ok()?;
      Some(RotatedBox::new(
        cx / COORDINATE_SCALE * img_w,
        cy / COORDINATE_SCALE * img_h,
        w / COORDINATE_SCALE * img_w,
        h / COORDINATE_SCALE * img_h,
        angle_deg.to_radians(),
      ))
    } else {
      let [x1, y1, x2, y2]: [f32; 4] = values.get(..4)?.try_into().ok()?;
      Some(RotatedBox::from_corners(
        x1 / COORDINATE_SCALE * img_w,
        y1 / COORDINATE_SCALE * img_h,
        x2 / COORDINATE_SCALE * img_w,
        y2 / COORDINATE_SCALE * img_h,
      ))
    }
  }
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedResponse {
  /// 产生结果的策略，无结果时为 None
  pub strategy: Option<ParseStrategy>,
  pub polygons: Vec<Polygon>,
}

impl ParsedResponse {
  pub fn is_empty(&self) -> bool {
    self.polygons.is_empty()
  }
}

/// 模型输出解析器
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
  image_width: u32,
  image_height: u32,
  max_detections: usize,
}

impl ResponseParser {
  pub fn new(image_width: u32, image_height: u32, max_detections: usize) -> Self {
    Self {
      image_width,
      image_height,
      max_detections,
    }
  }

  pub fn parse(&self, response: &str) -> ParsedResponse {
    if self.max_detections == 0 {
      return ParsedResponse::default();
    }

    for strategy in ParseStrategy::PRIORITY {
      let polygons = self.parse_with(strategy, response);
      if !polygons.is_empty() {
        debug!("{:?} 解析出 {} 个目标框", strategy, polygons.len());
        return ParsedResponse {
          strategy: Some(strategy),
          polygons,
        };
      }
    }

    info!("模型输出中没有可解析的目标框");
    ParsedResponse::default()
  }

  fn parse_with(&self, strategy: ParseStrategy, response: &str) -> Vec<Polygon> {
    let mut polygons = Vec::new();

    for captures in strategy.pattern().captures_iter(response) {
      if polygons.len() >= self.max_detections {
        break;
      }

      let Some(body) = captures.get(1) else {
        continue;
      };

      let values = match parse_numbers(body.as_str()) {
        Some(values) => values,
        None => {
          debug!("跳过无法解析的候选框: {}", body.as_str());
          continue;
        }
      };

      let Some(rbox) = strategy.to_rotated_box(&values, self.image_width, self.image_height)
      else {
        debug!("跳过坐标数量不足的候选框: {:?}", values);
        continue;
      };

      let polygon = rbox.to_polygon(self.image_width, self.image_height);
      if polygon.is_valid() {
        polygons.push(polygon);
      } else {
        debug!("跳过无效多边形: {:?}", polygon);
      }
    }

    polygons
  }
}

/// 解析逗号分隔的数字，任一项无效时返回 None
fn parse_numbers(body: &str) -> Option<Vec<f32>> {
  body
    .split(',')
    .map(|item| item.trim().parse::<f32>().ok().filter(|v| v.is_finite()))
    .collect()
}
