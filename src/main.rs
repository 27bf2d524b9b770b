//! Sseq - 谱序列图表服务
//!
//! 入口：初始化日志、加载配置、组装 Agent 树，stdin/stdout 上以 JSON 行与观察者通信。

use std::path::PathBuf;

use anyhow::Context;
use sseq::config::{load_config, AppConfig};
use sseq::core::shutdown::{run_until_shutdown, ChartDrain, ShutdownReason, ShutdownTrigger};
use sseq::transport::stdio::{pump_lines, write_lines};
use sseq::RuntimeBuilder;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志写 stderr：stdout 是传输通道
    sseq::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let drain_timeout = config.app.drain_timeout();
    let runtime = RuntimeBuilder::new(config)
        .build()
        .await
        .context("Failed to build chart runtime")?;

    // 观察者收到的消息与被拒绝输入的错误报告共用一条输出通道
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let observer = runtime
        .attach_observer_with("stdio", out_tx.clone())
        .await
        .context("Failed to attach stdio observer")?;

    let trigger = ShutdownTrigger::new();
    let router = runtime.spawn_router(trigger.token());

    // 输出在收尾 flush 之后才停
    let writer_token = CancellationToken::new();
    let writer = {
        let trigger = trigger.clone();
        let token = writer_token.clone();
        tokio::spawn(async move {
            let result = write_lines(out_rx, tokio::io::stdout(), token).await;
            if let Err(e) = &result {
                trigger.fire(ShutdownReason::FatalError(format!("output failed: {e}")));
            }
            result
        })
    };

    let app = {
        let tree = runtime.tree.clone();
        let trigger = trigger.clone();
        async move {
            let stdin = BufReader::new(tokio::io::stdin());
            let delivered = pump_lines(stdin, tree, observer, out_tx, trigger.token()).await;
            tracing::info!(delivered, "Input closed");
            trigger.fire(ShutdownReason::InputClosed);
        }
    };

    let drain =
        ChartDrain::new(runtime.tree.clone(), runtime.chart.clone()).with_timeout(drain_timeout);
    let finish = {
        let trigger = trigger.clone();
        move |reason: Option<ShutdownReason>| async move {
            tracing::info!(?reason, "Shutting down");
            trigger.fire(ShutdownReason::InputClosed);
            if let Err(e) = router.await {
                tracing::warn!("Router task failed: {}", e);
            }
            drain.run().await;
            writer_token.cancel();
            match writer.await {
                Ok(Ok(written)) => tracing::debug!(written, "Output closed"),
                Ok(Err(e)) => tracing::warn!("Output failed: {}", e),
                Err(e) => tracing::warn!("Writer task failed: {}", e),
            }
        }
    };
    run_until_shutdown(&trigger, app, finish).await;

    match trigger.reason() {
        Some(ShutdownReason::FatalError(msg)) => anyhow::bail!(msg),
        _ => Ok(()),
    }
}
