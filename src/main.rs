//! Tiny MoA - Rust 本地混合智能体系统
//!
//! 入口：初始化日志、加载配置、创建编排器；支持 `--query "..."` 单次模式与交互式 REPL。

use std::io::Write;

use moa::config::{load_config, AppConfig};
use moa::Orchestrator;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut orchestrator = Orchestrator::from_config(&cfg);

    // 单次模式：moa --query "..."
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "--query" || a == "-q") {
        let query = args
            .get(pos + 1)
            .map(String::as_str)
            .unwrap_or("")
            .to_string();
        let report = orchestrator.handle(&query).await?;
        println!("{}", report.response);
        return Ok(());
    }

    repl(&mut orchestrator).await
}

/// 交互式 REPL：/tools 列出可用工具，/clear 清空对话记忆，/quit 退出
async fn repl(orchestrator: &mut Orchestrator) -> anyhow::Result<()> {
    println!("Tiny MoA ready. Type a request, or /tools, /clear, /quit.");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                orchestrator.clear_memory();
                println!("Conversation memory cleared.");
            }
            "/tools" => {
                for (name, description) in orchestrator.tool_descriptions() {
                    println!("  {:<18} {}", name, description);
                }
            }
            query => match orchestrator.handle(query).await {
                Ok(report) => {
                    println!("{}", report.response);
                    tracing::debug!(
                        request_id = %report.request_id,
                        tasks = report.task_count,
                        succeeded = report.succeeded,
                        "request finished"
                    );
                }
                Err(e) => println!("Request failed: {}", e),
            },
        }
    }

    Ok(())
}
