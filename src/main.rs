// 该文件是 Yaogan （遥感问地） 项目的一部分。
// src/main.rs - 单次定位程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use yaogan::{
  FromUrl,
  args::ModelArgs,
  input::InputWrapper,
  output::OutputWrapper,
  registry::ServiceRegistry,
  task::{OneShotTask, Task},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub model: ModelArgs,
  /// 输入来源，如 image:///data/scene.png?instruction=Locate%20all%20ships
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 定位指令，覆盖输入地址中的 instruction
  #[arg(long, value_name = "TEXT")]
  pub instruction: Option<String>,
  /// 输出路径，默认以 JSON 打印到标准输出
  #[arg(long, value_name = "OUTPUT", default_value = "json:")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = args.model.to_config()?;
  let registry = ServiceRegistry::from_config(&config)?;
  let engine = registry.grounding();
  if args.model.warm_up {
    engine.warm_up();
  }

  let input = InputWrapper::from_url(&args.input)?.with_instruction(args.instruction);
  let output = OutputWrapper::from_url(&args.output)?;

  let result = OneShotTask.run_task(input, engine, output);
  registry.shutdown();
  result
}
