// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/adapter/slot.rs - 延迟加载的模型槽
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
  any::Any,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
};

use tracing::{debug, info, warn};

use crate::{adapter::AdapterError, model::ModelBuilder};

const UNCONFIGURED: &str = "未配置模型服务";

enum SlotState<M> {
  Empty,
  Ready(M),
  Unavailable(String),
}

/// 单个模型实例的持有者
///
/// 首次使用时构建模型，之后在进程内复用。构建失败后槽位保持不可用，
/// 直到显式 [`ModelSlot::reload`]。互斥锁在整个推理期间持有，
/// 同一实例同时只有一个推理在进行，并发请求在锁上排队。
pub struct ModelSlot<B: ModelBuilder> {
  name: &'static str,
  builder: Option<B>,
  state: Mutex<SlotState<B::Model>>,
  // 与 state 同步更新，查询时无需等待推理释放锁
  loaded: AtomicBool,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  match payload.downcast::<String>() {
    Ok(msg) => *msg,
    Err(payload) => match payload.downcast_ref::<&str>() {
      Some(msg) => msg.to_string(),
      None => "未知 panic".to_string(),
    },
  }
}

impl<B: ModelBuilder> ModelSlot<B> {
  pub fn new(name: &'static str, builder: Option<B>) -> Self {
    let state = match builder {
      Some(_) => SlotState::Empty,
      None => {
        warn!("{} 未配置，该模型不可用", name);
        SlotState::Unavailable(UNCONFIGURED.to_string())
      }
    };

    Self {
      name,
      builder,
      state: Mutex::new(state),
      loaded: AtomicBool::new(false),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn is_configured(&self) -> bool {
    self.builder.is_some()
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded.load(Ordering::Acquire)
  }

  fn set_state(&self, state: &mut SlotState<B::Model>, next: SlotState<B::Model>) {
    self
      .loaded
      .store(matches!(next, SlotState::Ready(_)), Ordering::Release);
    *state = next;
  }

  fn lock(&self) -> MutexGuard<'_, SlotState<B::Model>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn unavailable(&self, reason: &str) -> AdapterError {
    AdapterError::Unavailable {
      adapter: self.name,
      reason: reason.to_string(),
    }
  }

  fn ensure_ready(&self, state: &mut SlotState<B::Model>) -> Result<(), AdapterError> {
    match state {
      SlotState::Ready(_) => return Ok(()),
      SlotState::Unavailable(reason) => {
        debug!("{} 不可用: {}", self.name, reason);
        return Err(self.unavailable(reason));
      }
      SlotState::Empty => {}
    }

    let Some(builder) = self.builder.as_ref() else {
      warn!("{} 未配置，该模型不可用", self.name);
      self.set_state(state, SlotState::Unavailable(UNCONFIGURED.to_string()));
      return Err(self.unavailable(UNCONFIGURED));
    };

    info!("加载 {}", self.name);
    let reason = match catch_unwind(AssertUnwindSafe(|| builder.build())) {
      Ok(Ok(model)) => {
        self.set_state(state, SlotState::Ready(model));
        info!("{} 加载完成", self.name);
        return Ok(());
      }
      Ok(Err(e)) => e.to_string(),
      Err(payload) => panic_message(payload),
    };

    warn!("{} 加载失败，该模型不可用: {}", self.name, reason);
    let err = self.unavailable(&reason);
    self.set_state(state, SlotState::Unavailable(reason));
    Err(err)
  }

  /// 在持有锁的情况下使用模型
  ///
  /// 模型内部的 panic 被转换为推理错误，槽位回到未加载状态。
  pub fn with_model<R, E, F>(&self, f: F) -> Result<R, AdapterError>
  where
    E: std::error::Error + Send + Sync + 'static,
    F: FnOnce(&mut B::Model) -> Result<R, E>,
  {
    let mut state = self.lock();
    self.ensure_ready(&mut state)?;

    let SlotState::Ready(model) = &mut *state else {
      return Err(self.unavailable(UNCONFIGURED));
    };

    match catch_unwind(AssertUnwindSafe(|| f(model))) {
      Ok(Ok(output)) => Ok(output),
      Ok(Err(e)) => Err(AdapterError::Inference {
        adapter: self.name,
        source: Box::new(e),
      }),
      Err(payload) => {
        let msg = panic_message(payload);
        warn!("{} 推理时 panic，释放模型实例: {}", self.name, msg);
        self.set_state(&mut state, SlotState::Empty);
        Err(AdapterError::Inference {
          adapter: self.name,
          source: msg.into(),
        })
      }
    }
  }

  /// 立即构建模型
  pub fn warm_up(&self) -> Result<(), AdapterError> {
    let mut state = self.lock();
    self.ensure_ready(&mut state)
  }

  /// 释放当前实例后重新构建
  pub fn reload(&self) -> Result<(), AdapterError> {
    let mut state = self.lock();
    if matches!(*state, SlotState::Ready(_)) {
      info!("释放 {} 以重新加载", self.name);
    }
    self.set_state(&mut state, SlotState::Empty);
    self.ensure_ready(&mut state)
  }

  /// 释放模型实例，可重复调用
  pub fn release(&self) {
    let mut state = self.lock();
    if matches!(*state, SlotState::Ready(_)) {
      info!("释放 {}", self.name);
    }
    self.set_state(&mut state, SlotState::Empty);
  }
}
