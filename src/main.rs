//! Lifeline 命令行入口
//!
//! 用法：`lifeline [--config <path>] <goal...>`。初始化日志与运行时，运行一个目标并打印结果；
//! Ctrl+C 中止当前会话，退出前落盘历史索引。

use std::path::PathBuf;

use anyhow::Context;
use lifeline::{create_runtime, llm::create_llm_from_config, observability, Outcome};

fn parse_args() -> anyhow::Result<(Option<PathBuf>, String)> {
    let mut config_path = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(PathBuf::from(
                args.next().context("--config requires a path")?,
            ));
        } else {
            words.push(arg);
        }
    }
    let goal = words.join(" ");
    anyhow::ensure!(!goal.trim().is_empty(), "usage: lifeline [--config <path>] <goal...>");
    Ok((config_path, goal))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let (config_path, goal) = parse_args()?;
    let runtime = create_runtime(config_path).await?;
    runtime.shutdown_manager().install_signal_handlers();

    let llm = create_llm_from_config(runtime.config());
    let controller = runtime.llm_controller(llm);
    let abort = runtime.abort_handle();

    let outcome = controller.run_with_abort(&goal, &abort).await;
    runtime.shutdown().await;

    match outcome {
        Outcome::Answered(text) => println!("{}", text),
        Outcome::Exhausted => {
            eprintln!("No final answer within the step budget");
            std::process::exit(2);
        }
        Outcome::Aborted(reason) => {
            eprintln!("Aborted: {}", reason);
            std::process::exit(130);
        }
    }
    Ok(())
}
