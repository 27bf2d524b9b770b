//! 关闭流程
//!
//! 触发源有三个：Ctrl+C、SIGTERM、输入流结束。第一次触发的原因被记下，之后的触发只取消 token。
//! 路由循环停下后由 [`ChartDrain`] 收尾：先把投递队列跑空，再把脏集合里的更新广播出去，
//! 整个收尾受一个超时约束。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentTree;
use crate::chart::ChartState;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// stdin EOF
    InputClosed,
    FatalError(String),
}

/// 关闭触发器：一个取消 token 加上首个关闭原因
#[derive(Clone)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    reason: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            reason,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 记录原因（只保留第一次）并取消 token；返回本次是否是首次触发
    pub fn fire(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if first {
            tracing::info!(?reason, "Shutdown triggered");
        }
        self.token.cancel();
        first
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.borrow().clone()
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等到触发后返回原因
    pub async fn fired(&self) -> Option<ShutdownReason> {
        self.token.cancelled().await;
        self.reason()
    }

    /// 后台监听 Ctrl+C 与 SIGTERM
    pub fn listen_for_signals(&self) {
        let trigger = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.fire(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let trigger = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        trigger.fire(ShutdownReason::Terminate);
                    }
                    Err(e) => tracing::warn!("Cannot listen for SIGTERM: {}", e),
                }
            });
        }
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// 收尾结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// 路由停止后补处理的投递数
    pub deliveries: usize,
    /// 最后一次 flush 广播的元素数
    pub flushed: usize,
    pub timed_out: bool,
}

/// 路由循环停止后的收尾：跑空队列，然后 flush 图表
pub struct ChartDrain {
    tree: AgentTree,
    chart: Arc<ChartState>,
    timeout: Duration,
}

impl ChartDrain {
    pub fn new(tree: AgentTree, chart: Arc<ChartState>) -> Self {
        Self {
            tree,
            chart,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let work = async {
            report.deliveries = self.tree.drain().await;
            if self.chart.pending_updates().await > 0 {
                report.flushed = self.chart.flush_updates().await;
                // flush 产生的出站广播也要送达观察者
                report.deliveries += self.tree.drain().await;
            }
        };
        if tokio::time::timeout(self.timeout, work).await.is_err() {
            tracing::warn!(timeout = ?self.timeout, "Drain timed out");
            report.timed_out = true;
        }
        tracing::info!(
            deliveries = report.deliveries,
            flushed = report.flushed,
            "Chart drained"
        );
        report
    }
}

/// 运行 `app` 直到它结束或关闭被触发，然后执行 `finish`
pub async fn run_until_shutdown<A, F, Fut>(trigger: &ShutdownTrigger, app: A, finish: F)
where
    A: Future<Output = ()>,
    F: FnOnce(Option<ShutdownReason>) -> Fut,
    Fut: Future<Output = ()>,
{
    trigger.listen_for_signals();
    tokio::select! {
        _ = app => tracing::debug!("Application future finished"),
        _ = trigger.token.cancelled() => {}
    }
    finish(trigger.reason()).await;
}
