// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/geometry.rs - 旋转框几何变换
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

use serde::{Deserialize, Serialize};

/// 旋转框（像素坐标）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotatedBox {
  /// 中心点 x 坐标
  pub cx: f32,
  /// 中心点 y 坐标
  pub cy: f32,
  /// 宽度
  pub width: f32,
  /// 高度
  pub height: f32,
  /// 旋转角（弧度，逆时针为正）
  pub angle: f32,
}

impl RotatedBox {
  pub fn new(cx: f32, cy: f32, width: f32, height: f32, angle: f32) -> Self {
    Self {
      cx,
      cy,
      width,
      height,
      angle,
    }
  }

  /// 由轴对齐框 (x1, y1, x2, y2) 构造，角度为 0
  pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self {
      cx: (x1 + x2) / 2.0,
      cy: (y1 + y2) / 2.0,
      width: (x2 - x1).abs(),
      height: (y2 - y1).abs(),
      angle: 0.0,
    }
  }

  pub fn is_finite(&self) -> bool {
    [self.cx, self.cy, self.width, self.height, self.angle]
      .iter()
      .all(|v| v.is_finite())
  }

  /// 转换为归一化四角点多边形
  pub fn to_polygon(&self, image_width: u32, image_height: u32) -> Polygon {
    let (sin, cos) = self.angle.sin_cos();
    let hw = self.width / 2.0;
    let hh = self.height / 2.0;

    // 左上、右上、右下、左下
    let offsets = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)];

    let (img_w, img_h) = (image_width as f32, image_height as f32);
    let mut coords = [0.0f32; 8];
    for (i, (dx, dy)) in offsets.into_iter().enumerate() {
      let x = cos * dx - sin * dy + self.cx;
      let y = sin * dx + cos * dy + self.cy;
      coords[i * 2] = x / img_w;
      coords[i * 2 + 1] = y / img_h;
    }

    Polygon::clamped(coords)
  }
}

/// 归一化四角点多边形 (x1, y1, x2, y2, x3, y3, x4, y4)
///
/// 所有有限坐标都被截断到 [0, 1]。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon([f32; 8]);

impl Polygon {
  pub fn clamped(coords: [f32; 8]) -> Self {
    // NaN 经过 clamp 仍为 NaN，由 is_valid 负责剔除
    Self(coords.map(|v| v.clamp(0.0, 1.0)))
  }

  pub fn as_array(&self) -> &[f32; 8] {
    &self.0
  }

  pub fn corners(&self) -> [(f32, f32); 4] {
    let c = &self.0;
    [(c[0], c[1]), (c[2], c[3]), (c[4], c[5]), (c[6], c[7])]
  }

  /// 有效角点数量
  pub fn valid_corners(&self) -> usize {
    self
      .corners()
      .iter()
      .filter(|(x, y)| x.is_finite() && y.is_finite())
      .count()
  }

  pub fn is_valid(&self) -> bool {
    self.valid_corners() == 4
  }
}

impl From<Polygon> for [f32; 8] {
  fn from(polygon: Polygon) -> Self {
    polygon.0
  }
}

/// 旋转框转换为归一化多边形
pub fn obb_to_polygon(
  cx: f32,
  cy: f32,
  width: f32,
  height: f32,
  angle: f32,
  image_width: u32,
  image_height: u32,
) -> Polygon {
  RotatedBox::new(cx, cy, width, height, angle).to_polygon(image_width, image_height)
}
