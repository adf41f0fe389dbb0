// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/task.rs - 任务运行器
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
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
  engine::{Grounder, GroundingResult},
  frame::Frame,
  input::{ImageRef, Query},
  output::Render,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

fn log_statistics<M: Grounder>(model: &M) {
  match serde_json::to_string(&model.statistics()) {
    Ok(stats) => info!("统计: {}", stats),
    Err(e) => warn!("统计数据序列化失败: {}", e),
  }
}

pub struct OneShotTask;

impl<RE, I, M, O> Task<I, M, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Query>,
  M: Grounder,
  O: Render<Frame, GroundingResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let query = input.next().ok_or_else(|| anyhow::anyhow!("没有输入查询"))?;
    info!("查询: {} / {:?}", query.image.describe(), query.instruction);
    let now = Instant::now();
    let (frame, result) = model.ground(query)?;
    let elapsed = now.elapsed();
    info!("定位完成，{} 个目标，耗时: {:.2?}", result.detections.len(), elapsed);
    output.render_result(&frame, &result)?;
    info!("输出完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 重复执行同一查询，用于测量平均延迟
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 100 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }
}

impl<RE, I, M, O> Task<I, M, O> for RepeatShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Query>,
  M: Grounder,
  O: Render<Frame, GroundingResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let query = input.next().ok_or_else(|| anyhow::anyhow!("没有输入查询"))?;
    let mut times = Vec::with_capacity(self.times);

    // 首次查询负责解码图像，之后复用已解码的帧
    let now = Instant::now();
    let (frame, result) = model.ground(query.clone())?;
    times.push(now.elapsed());
    output.render_result(&frame, &result)?;
    let decoded = Query {
      image: ImageRef::Decoded(frame.into_image()),
      ..query
    };

    for i in 1..self.times {
      let now = Instant::now();
      let (frame, result) = model.ground(decoded.clone())?;
      let elapsed = now.elapsed();
      info!("({})定位完成，{} 个目标，耗时: {:.2?}", i, result.detections.len(), elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    // 前两次包含模型加载，不计入平均
    let warm = if times.len() > 2 { &times[2..] } else { &times[..] };
    warn!(
      "平均定位时间: {:.2?} ({} 次)",
      warm.iter().sum::<Duration>() / warm.len() as u32,
      warm.len()
    );
    log_statistics(&model);

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  query_limit: Option<usize>,
  handle_interrupt: bool,
}

impl ContinuousTask {
  pub fn with_query_limit(mut self, query_limit: Option<usize>) -> Self {
    self.query_limit = query_limit;
    self
  }

  /// 安装 Ctrl-C 处理，收到信号后处理完当前查询即退出
  pub fn with_interrupt_handler(mut self, handle_interrupt: bool) -> Self {
    self.handle_interrupt = handle_interrupt;
    self
  }
}

impl<RE, I, M, O> Task<I, M, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Query>,
  M: Grounder,
  O: Render<Frame, GroundingResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    if self.handle_interrupt {
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(());
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })?;
    }

    let mut query_index = 0usize;
    for query in input {
      query_index += 1;
      info!("处理第 {} 个查询: {}", query_index, query.image.describe());
      let now = Instant::now();
      match model.ground(query) {
        Ok((frame, result)) => {
          let elapsed_a = now.elapsed();
          output.render_result(&frame, &result)?;
          info!(
            "{} 个目标，耗时: {:.2?} / {:.2?}",
            result.detections.len(),
            elapsed_a,
            now.elapsed()
          );
        }
        Err(e) => error!("第 {} 个查询图像加载失败，跳过: {}", query_index, e),
      }

      if self.query_limit.is_some_and(|n| query_index >= n) {
        info!("达到指定查询数 {}, 退出任务循环", query_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    log_statistics(&model);
    info!("任务完成，退出");
    Ok(())
  }
}
