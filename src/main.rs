// 该文件是 Linzhi （林芝） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use linzhi::{ErrorKind, PredictorConfig, run};

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = PredictorConfig::from(&args);

  info!("模型文件路径: {}", config.model.display());
  info!("输入来源: {}", config.source);
  if let Some(save) = &config.save {
    info!("输出路径: {}", save);
  }

  match run(config) {
    Ok(results) => {
      if args.json {
        for result in &results {
          println!("{}", result.to_json());
        }
      }
      let total: usize = results.iter().map(|r| r.len()).sum();
      info!("处理完成，共 {} 帧，{} 个检测", results.len(), total);
      ExitCode::SUCCESS
    }
    Err(e) => match e.kind() {
      ErrorKind::MissingFile => {
        error!("找不到所需文件: {}", e);
        eprintln!("Error: required file not found: {}", e);
        ExitCode::from(2)
      }
      ErrorKind::Other => {
        error!("运行失败: {}", e);
        eprintln!("Error: {}", e);
        ExitCode::from(1)
      }
    },
  }
}
