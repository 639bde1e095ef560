// 该文件是 Linzhi （林芝） 项目的一部分。
// src/task.rs - 推理任务循环
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
  fmt::Display,
  sync::{
    Once,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::{model::Model, output::Render};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static CTRLC_HANDLER: Once = Once::new();

/// 安装 Ctrl-C 处理函数，进程内只安装一次
fn install_interrupt_handler() {
  CTRLC_HANDLER.call_once(|| {
    let result = ctrlc::set_handler(|| {
      info!("收到中断信号，准备退出...");
      INTERRUPTED.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = result {
      warn!("无法设置 Ctrl-C 处理函数: {}", e);
    }
  });
}

/// 输入迭代器逐帧产出 `Result`，读取失败即终止任务并返回该错误
pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: &M, output: &O) -> Result<Self::Output, Self::Error>;
}

/// 只处理第一帧
pub struct OneShotTask;

impl<
  F,
  D: Display,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  IE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Output = Vec<D>;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &M, output: &O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("{}", result);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(vec![result])
  }
}

/// 依次处理全部帧，可限制帧数，收到 Ctrl-C 后退出循环
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D: Display,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  IE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Output = Vec<D>;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: &M, output: &O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    install_interrupt_handler();
    INTERRUPTED.store(false, Ordering::SeqCst);

    let mut results = Vec::new();
    let mut now = Instant::now();
    for frame in input {
      if self.frame_number.is_some_and(|n| results.len() >= n) {
        info!("达到指定帧数 {}, 退出任务循环", results.len());
        break;
      }

      let frame = frame?;
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("{}", result);
      debug!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      results.push(result);

      if INTERRUPTED.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", results.len());
    Ok(results)
  }
}
