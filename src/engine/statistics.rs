// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/engine/statistics.rs - 服务统计
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

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::engine::ModelKind;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
  total_queries: u64,
  closed_vocabulary_selections: u64,
  open_vocabulary_selections: u64,
  failed_queries: u64,
  total_detections: u64,
}

/// 进程内的查询计数，只在进程重启或显式重置时清零
///
/// 每次查询恰好计入一次总数，并且恰好计入一个模型选择计数或失败计数。
#[derive(Debug, Default)]
pub struct ServiceStatistics {
  counters: Mutex<Counters>,
}

impl ServiceStatistics {
  fn lock(&self) -> MutexGuard<'_, Counters> {
    self.counters.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn record_success(&self, model: ModelKind, detections: usize) {
    let mut counters = self.lock();
    counters.total_queries += 1;
    counters.total_detections += detections as u64;
    match model {
      ModelKind::ClosedVocabulary => counters.closed_vocabulary_selections += 1,
      ModelKind::OpenVocabulary => counters.open_vocabulary_selections += 1,
    }
  }

  pub fn record_failure(&self) {
    let mut counters = self.lock();
    counters.total_queries += 1;
    counters.failed_queries += 1;
  }

  pub fn reset(&self) {
    *self.lock() = Counters::default();
  }

  pub fn snapshot(
    &self,
    closed_vocabulary_loaded: bool,
    open_vocabulary_loaded: bool,
  ) -> StatisticsSnapshot {
    let c = *self.lock();
    let percent = |n: u64| {
      if c.total_queries > 0 {
        n as f64 / c.total_queries as f64 * 100.0
      } else {
        0.0
      }
    };
    let succeeded = c.total_queries - c.failed_queries;

    StatisticsSnapshot {
      total_queries: c.total_queries,
      total_detections: c.total_detections,
      failed_queries: c.failed_queries,
      success_rate: percent(succeeded),
      closed_vocabulary_selections: c.closed_vocabulary_selections,
      closed_vocabulary_percentage: percent(c.closed_vocabulary_selections),
      open_vocabulary_selections: c.open_vocabulary_selections,
      open_vocabulary_percentage: percent(c.open_vocabulary_selections),
      average_detections_per_query: if succeeded > 0 {
        c.total_detections as f64 / succeeded as f64
      } else {
        0.0
      },
      closed_vocabulary_loaded,
      open_vocabulary_loaded,
    }
  }
}

/// 统计快照，百分比取值 0 到 100
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
  pub total_queries: u64,
  pub total_detections: u64,
  pub failed_queries: u64,
  pub success_rate: f64,
  pub closed_vocabulary_selections: u64,
  pub closed_vocabulary_percentage: f64,
  pub open_vocabulary_selections: u64,
  pub open_vocabulary_percentage: f64,
  /// 按成功查询数平均
  pub average_detections_per_query: f64,
  pub closed_vocabulary_loaded: bool,
  pub open_vocabulary_loaded: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_statistics_have_zero_rates() {
    let snapshot = ServiceStatistics::default().snapshot(false, false);
    assert_eq!(snapshot.total_queries, 0);
    assert_eq!(snapshot.success_rate, 0.0);
    assert_eq!(snapshot.average_detections_per_query, 0.0);
  }

  #[test]
  fn every_query_lands_in_one_bucket() {
    let stats = ServiceStatistics::default();
    stats.record_success(ModelKind::ClosedVocabulary, 3);
    stats.record_success(ModelKind::OpenVocabulary, 1);
    stats.record_success(ModelKind::OpenVocabulary, 0);
    stats.record_failure();

    let s = stats.snapshot(true, false);
    assert_eq!(s.total_queries, 4);
    assert_eq!(
      s.total_queries,
      s.closed_vocabulary_selections + s.open_vocabulary_selections + s.failed_queries
    );
    assert_eq!(s.total_detections, 4);
    assert_eq!(s.success_rate, 75.0);
    assert_eq!(s.closed_vocabulary_percentage, 25.0);
    assert_eq!(s.open_vocabulary_percentage, 50.0);
    assert!((s.average_detections_per_query - 4.0 / 3.0).abs() < 1e-9);
    assert!(s.closed_vocabulary_loaded);
  }

  #[test]
  fn reset_clears_counters() {
    let stats = ServiceStatistics::default();
    stats.record_failure();
    stats.reset();
    assert_eq!(stats.snapshot(false, false).total_queries, 0);
  }
}
