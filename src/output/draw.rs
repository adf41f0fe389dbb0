// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/output/draw.rs - 定位结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_line_segment_mut},
  rect::Rect,
};

use crate::{engine::GroundingResult, frame::Frame, geometry::Polygon};

const LINE_THICKNESS: u32 = 2;
const CORNER_MARKER_SIZE: u32 = 6;
const PALETTE_SIZE: usize = 12;

/// 在图像上绘制定位多边形
///
/// 每个目标按编号取色，第一个角点（旋转前的左上角）额外绘制一个方块标记，
/// 便于确认角点顺序。
pub struct Draw {
  colors: Vec<Rgb<u8>>,
  thickness: u32,
}

impl Default for Draw {
  fn default() -> Self {
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      colors,
      thickness: LINE_THICKNESS,
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  pub fn with_thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  fn color(&self, index: usize) -> Rgb<u8> {
    self.colors[index % self.colors.len()]
  }

  fn draw_polygon(&self, image: &mut RgbImage, polygon: &Polygon, color: Rgb<u8>) {
    let (w, h) = (
      image.width().saturating_sub(1) as f32,
      image.height().saturating_sub(1) as f32,
    );
    let points = polygon.corners().map(|(x, y)| (x * w, y * h));

    for i in 0..points.len() {
      let (x0, y0) = points[i];
      let (x1, y1) = points[(i + 1) % points.len()];
      // 越界的像素由 imageproc 裁剪
      for t in 0..self.thickness {
        let o = t as f32;
        draw_line_segment_mut(image, (x0 + o, y0), (x1 + o, y1), color);
        draw_line_segment_mut(image, (x0, y0 + o), (x1, y1 + o), color);
      }
    }

    let (x, y) = points[0];
    let half = (CORNER_MARKER_SIZE / 2) as i32;
    let marker = Rect::at(x as i32 - half, y as i32 - half)
      .of_size(CORNER_MARKER_SIZE, CORNER_MARKER_SIZE);
    draw_filled_rect_mut(image, marker, color);
  }

  pub fn draw_result(&self, image: &mut RgbImage, result: &GroundingResult) {
    for (i, detection) in result.detections.iter().enumerate() {
      self.draw_polygon(image, &detection.polygon, self.color(i));
    }
  }

  pub fn draw_detections(&self, frame: &Frame, result: &GroundingResult) -> RgbImage {
    let mut image = frame.image().clone();
    self.draw_result(&mut image, result);
    image
  }
}
