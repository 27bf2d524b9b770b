//! Agent 树的 arena、投递队列与分发逻辑

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::{Agent, AgentLink, Fault, FaultDisposition, FaultSink};
use crate::core::{FaultRoute, FaultRouter, SseqError};
use crate::message::wire::opaque;
use crate::message::{any_matches, AgentPath, Command, Envelope, Message};

/// arena 中的稳定索引
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AgentId(usize);

impl AgentId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 擦除路由类型后的处理器表
#[async_trait]
trait Handlers: Send + Sync {
    fn subscriptions(&self) -> &[Command];
    fn patterns(&self) -> &[Command];
    async fn invoke(
        &self,
        index: usize,
        envelope: &mut Envelope,
        link: &AgentLink,
    ) -> Result<(), SseqError>;
    fn on_fault(&self, fault: &Fault) -> FaultDisposition;
    fn receives_own_broadcasts(&self) -> bool;
}

struct Mounted<A: Agent> {
    agent: Arc<A>,
    subscriptions: Vec<Command>,
    patterns: Vec<Command>,
    routes: Vec<A::Route>,
}

impl<A: Agent> Mounted<A> {
    fn new(agent: A) -> Result<Self, SseqError> {
        let mut patterns = Vec::new();
        let mut routes = Vec::new();
        for (pattern, route) in agent.routes() {
            patterns.push(Command::parse(pattern)?);
            routes.push(*route);
        }
        Ok(Self {
            subscriptions: agent.subscriptions(),
            agent: Arc::new(agent),
            patterns,
            routes,
        })
    }
}

#[async_trait]
impl<A: Agent> Handlers for Mounted<A> {
    fn subscriptions(&self) -> &[Command] {
        &self.subscriptions
    }

    fn patterns(&self) -> &[Command] {
        &self.patterns
    }

    async fn invoke(
        &self,
        index: usize,
        envelope: &mut Envelope,
        link: &AgentLink,
    ) -> Result<(), SseqError> {
        let route = self.routes[index];
        self.agent.handle(route, envelope, link).await
    }

    fn on_fault(&self, fault: &Fault) -> FaultDisposition {
        self.agent.on_fault(fault)
    }

    fn receives_own_broadcasts(&self) -> bool {
        self.agent.receives_own_broadcasts()
    }
}

struct Node {
    name: Command,
    path: AgentPath,
    parent: Option<AgentId>,
    children: Vec<AgentId>,
    handlers: Arc<dyn Handlers>,
}

/// 分发时使用的节点快照（不持锁执行处理器）
#[derive(Clone)]
struct NodeView {
    name: Command,
    path: AgentPath,
    parent: Option<AgentId>,
    children: Vec<AgentId>,
    handlers: Arc<dyn Handlers>,
}

enum Delivery {
    Inbound { to: AgentId, envelope: Envelope },
    Outbound { from: AgentId, envelope: Envelope },
}

pub(super) struct Shared {
    nodes: RwLock<Vec<Option<Node>>>,
    queue_tx: mpsc::UnboundedSender<Delivery>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    fault_sink: Arc<dyn FaultSink>,
    router: FaultRouter,
}

/// Agent 树句柄（可克隆，共享同一棵树）
#[derive(Clone)]
pub struct AgentTree {
    shared: Arc<Shared>,
}

impl AgentTree {
    pub fn new(fault_sink: Arc<dyn FaultSink>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                nodes: RwLock::new(Vec::new()),
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                fault_sink,
                router: FaultRouter::new(),
            }),
        }
    }

    pub(super) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// 挂载一个 Agent。`parent` 为 None 时作为根（只允许一个根）。
    ///
    /// `build` 在 Agent 构造前拿到自己的 link，便于状态对象持有出站句柄。
    pub async fn attach<A, F>(
        &self,
        parent: Option<AgentId>,
        name: &str,
        build: F,
    ) -> Result<AgentId, SseqError>
    where
        A: Agent,
        F: FnOnce(AgentLink) -> A,
    {
        if name.is_empty() || name.contains('.') || name.contains('/') {
            return Err(SseqError::Fault(format!("invalid agent name \"{name}\"")));
        }
        let mut nodes = self.shared.nodes.write().await;
        let path = match parent {
            Some(p) => nodes
                .get(p.0)
                .and_then(Option::as_ref)
                .map(|n| n.path.child(name))
                .ok_or(SseqError::AgentNotFound(p.0))?,
            None => {
                if nodes.iter().any(|n| n.as_ref().is_some_and(|n| n.parent.is_none())) {
                    return Err(SseqError::Fault("tree already has a root".to_string()));
                }
                AgentPath::new(vec![name.to_string()])
            }
        };

        let id = AgentId(nodes.len());
        let link = AgentLink::new(Arc::downgrade(&self.shared), id, path.clone());
        let handlers = Mounted::new(build(link))?;
        nodes.push(Some(Node {
            name: Command::from_segments([name]),
            path: path.clone(),
            parent,
            children: Vec::new(),
            handlers: Arc::new(handlers),
        }));
        if let Some(p) = parent {
            if let Some(Some(parent_node)) = nodes.get_mut(p.0) {
                parent_node.children.push(id);
            }
        }
        tracing::debug!(agent = %path, "Agent attached");
        Ok(id)
    }

    /// 摘除一个 Agent 及其整棵子树
    pub async fn detach(&self, id: AgentId) -> Result<(), SseqError> {
        let mut nodes = self.shared.nodes.write().await;
        let parent = nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(SseqError::AgentNotFound(id.0))?
            .parent;
        if let Some(Some(parent_node)) = parent.and_then(|p| nodes.get_mut(p.0)) {
            parent_node.children.retain(|c| *c != id);
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = nodes.get_mut(current.0).and_then(Option::take) {
                tracing::debug!(agent = %node.path, "Agent detached");
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    pub async fn contains(&self, id: AgentId) -> bool {
        self.view(id).await.is_some()
    }

    pub async fn children(&self, id: AgentId) -> Vec<AgentId> {
        self.view(id).await.map(|v| v.children).unwrap_or_default()
    }

    pub async fn parent(&self, id: AgentId) -> Option<AgentId> {
        self.view(id).await.and_then(|v| v.parent)
    }

    pub async fn path(&self, id: AgentId) -> Option<AgentPath> {
        self.view(id).await.map(|v| v.path)
    }

    /// 按名字路径查找仍挂在树上的 Agent
    pub async fn resolve(&self, path: &AgentPath) -> Option<AgentId> {
        let nodes = self.shared.nodes.read().await;
        nodes.iter().enumerate().find_map(|(index, node)| {
            node.as_ref()
                .filter(|n| &n.path == path)
                .map(|_| AgentId(index))
        })
    }

    /// 直接投递给某个 Agent（忽略其订阅），来源记为 `source`
    pub fn inject(&self, to: AgentId, source: AgentPath, msg: Message) {
        self.shared.enqueue(Delivery::Inbound {
            to,
            envelope: Envelope::new(source, msg),
        });
    }

    /// 以 `from` 的名义发出出站消息
    pub async fn send_outbound(&self, from: AgentId, msg: Message) -> Result<(), SseqError> {
        let path = self
            .path(from)
            .await
            .ok_or(SseqError::AgentNotFound(from.0))?;
        self.shared.enqueue_outbound(from, path, msg);
        Ok(())
    }

    /// 处理队列中已有的全部投递（包括处理过程中新产生的），返回处理条数
    ///
    /// 与 `run` 共用同一个接收端，`run` 运行期间调用会一直等待。
    pub async fn drain(&self) -> usize {
        let mut rx = self.shared.queue_rx.lock().await;
        let mut processed = 0;
        while let Ok(delivery) = rx.try_recv() {
            self.process(delivery).await;
            processed += 1;
        }
        processed
    }

    /// 路由主循环：按入队顺序逐条处理，直到 token 取消
    pub async fn run(&self, token: CancellationToken) {
        let mut rx = self.shared.queue_rx.lock().await;
        tracing::info!("Agent tree router started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                delivery = rx.recv() => match delivery {
                    Some(delivery) => self.process(delivery).await,
                    None => break,
                },
            }
        }
        tracing::info!("Agent tree router stopped");
    }

    async fn process(&self, delivery: Delivery) {
        match delivery {
            Delivery::Inbound { to, mut envelope } => {
                let command = envelope.command().clone();
                self.dispatch_inbound(to, &mut envelope, command, true).await;
            }
            Delivery::Outbound { from, envelope } => {
                self.dispatch_outbound(from, envelope).await;
            }
        }
    }

    async fn view(&self, id: AgentId) -> Option<NodeView> {
        let nodes = self.shared.nodes.read().await;
        nodes.get(id.0).and_then(Option::as_ref).map(|n| NodeView {
            name: n.name.clone(),
            path: n.path.clone(),
            parent: n.parent,
            children: n.children.clone(),
            handlers: Arc::clone(&n.handlers),
        })
    }

    /// 入站分发。`command` 是到达本节点时剩余的命令（上级已剥去各自的名字前缀）；
    /// `direct` 为真表示直接投递给该节点，不检查订阅。
    fn dispatch_inbound<'a>(
        &'a self,
        to: AgentId,
        envelope: &'a mut Envelope,
        command: Command,
        direct: bool,
    ) -> BoxFuture<'a, ()> {
        async move {
            let Some(view) = self.view(to).await else {
                tracing::debug!(agent = to.0, "Inbound to detached agent dropped");
                return;
            };
            if !direct && !any_matches(view.handlers.subscriptions(), &command) {
                return;
            }
            let link = AgentLink::new(Arc::downgrade(&self.shared), to, view.path.clone());
            let relative = command.strip_prefix(&view.name).unwrap_or(command);

            for (index, pattern) in view.handlers.patterns().iter().enumerate() {
                if envelope.is_used() {
                    break;
                }
                if !pattern.matches(&relative) {
                    continue;
                }
                tracing::debug!(agent = %view.path, command = %envelope.command(), envelope = %envelope.id, "Dispatch");
                if let Err(err) = view.handlers.invoke(index, envelope, &link).await {
                    let origin = envelope.source.clone();
                    let command = envelope.command().clone();
                    self.route_error(to, &origin, &command, err).await;
                    return;
                }
            }

            for child in view.children {
                if envelope.is_used() {
                    break;
                }
                self.dispatch_inbound(child, envelope, relative.clone(), false)
                    .await;
            }
        }
        .boxed()
    }

    /// 出站：逐级交给父节点，父节点向其余订阅匹配的子节点广播新副本
    async fn dispatch_outbound(&self, from: AgentId, envelope: Envelope) {
        let mut current = from;
        loop {
            let Some(view) = self.view(current).await else {
                return;
            };
            let Some(parent) = view.parent else {
                self.reach_root(&view.path, &envelope);
                return;
            };
            let Some(parent_view) = self.view(parent).await else {
                return;
            };
            for child in parent_view.children {
                if child == current
                    && !(current == from && view.handlers.receives_own_broadcasts())
                {
                    continue;
                }
                let mut copy = envelope.fresh_copy();
                let command = copy.command().clone();
                self.dispatch_inbound(child, &mut copy, command, false).await;
            }
            current = parent;
        }
    }

    fn reach_root(&self, root: &AgentPath, envelope: &Envelope) {
        if envelope.command().first() == Some("error") {
            tracing::error!(root = %root, command = %envelope.command(), kwargs = ?envelope.msg.kwargs, "Error report reached root");
        } else {
            tracing::trace!(root = %root, command = %envelope.command(), "Outbound reached root");
        }
    }

    /// 按 FaultRouter 的去向处理一次处理器错误
    pub(super) async fn route_error(
        &self,
        agent: AgentId,
        origin: &AgentPath,
        command: &Command,
        err: SseqError,
    ) {
        let Some(view) = self.view(agent).await else {
            return;
        };
        match self.shared.router.route(&err) {
            FaultRoute::Absorb => {
                tracing::info!(agent = %view.path, command = %command, "Rejected: {}", err);
            }
            FaultRoute::ReportToOrigin => {
                tracing::warn!(agent = %view.path, command = %command, origin = %origin, "Protocol error: {}", err);
                let report = Message::new(Command::topic("error.protocol"))
                    .with("command", command)
                    .with("origin", opaque(origin))
                    .with("msg", err.to_string());
                // 只回给发起方，不广播
                match self.resolve(origin).await {
                    Some(to) => self.shared.enqueue(Delivery::Inbound {
                        to,
                        envelope: Envelope::new(view.path, report),
                    }),
                    None => {
                        tracing::warn!(origin = %origin, "Originator not in tree, protocol error dropped")
                    }
                }
            }
            FaultRoute::Escalate => {
                let fault = Fault {
                    agent: view.path.clone(),
                    command: command.clone(),
                    origin: origin.clone(),
                    error: err.to_string(),
                };
                let mut ancestor = view.parent;
                while let Some(id) = ancestor {
                    let Some(ancestor_view) = self.view(id).await else {
                        break;
                    };
                    if ancestor_view.handlers.on_fault(&fault) == FaultDisposition::Handled {
                        tracing::debug!(agent = %fault.agent, handler = %ancestor_view.path, "Fault handled by ancestor");
                        return;
                    }
                    ancestor = ancestor_view.parent;
                }
                self.shared.fault_sink.report(&fault);
                let report = Message::new(Command::topic("error.exception"))
                    .with("command", &fault.command)
                    .with("origin", opaque(&fault.origin))
                    .with("msg", &fault.error);
                self.shared.enqueue_outbound(agent, view.path, report);
            }
        }
    }
}

impl Shared {
    fn enqueue(&self, delivery: Delivery) {
        if self.queue_tx.send(delivery).is_err() {
            tracing::warn!("Agent tree queue closed, delivery dropped");
        }
    }

    pub(super) fn enqueue_outbound(&self, from: AgentId, source: AgentPath, msg: Message) {
        self.enqueue(Delivery::Outbound {
            from,
            envelope: Envelope::new(source, msg),
        });
    }
}

pub(super) fn upgrade(shared: &Weak<Shared>) -> Option<AgentTree> {
    shared.upgrade().map(AgentTree::from_shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LogFaultSink;
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    #[derive(Clone, Copy, Debug)]
    enum RecRoute {
        Record,
    }

    /// 记录收到的命令；`consume` 为真时标记已消费
    struct Recorder {
        name: &'static str,
        subs: Vec<&'static str>,
        consume: bool,
        own: bool,
        log: Log,
    }

    #[async_trait]
    impl Agent for Recorder {
        type Route = RecRoute;

        fn subscriptions(&self) -> Vec<Command> {
            self.subs.iter().map(|s| Command::topic(s)).collect()
        }

        fn routes(&self) -> &'static [(&'static str, RecRoute)] {
            &[("*", RecRoute::Record)]
        }

        async fn handle(
            &self,
            _route: RecRoute,
            envelope: &mut Envelope,
            _link: &AgentLink,
        ) -> Result<(), SseqError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, envelope.command()));
            if self.consume {
                envelope.mark_used()?;
            }
            Ok(())
        }

        fn receives_own_broadcasts(&self) -> bool {
            self.own
        }
    }

    fn recorder(name: &'static str, subs: Vec<&'static str>, log: &Log) -> Recorder {
        Recorder {
            name,
            subs,
            consume: false,
            own: false,
            log: log.clone(),
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum PairRoute {
        First,
        Second,
        Again,
    }

    /// 同一命令注册多个处理器
    struct Pair {
        log: Log,
        double: bool,
    }

    #[async_trait]
    impl Agent for Pair {
        type Route = PairRoute;

        fn subscriptions(&self) -> Vec<Command> {
            vec![Command::wildcard()]
        }

        fn routes(&self) -> &'static [(&'static str, PairRoute)] {
            &[
                ("ping", PairRoute::First),
                ("ping", PairRoute::Second),
                ("twice", PairRoute::Again),
            ]
        }

        async fn handle(
            &self,
            route: PairRoute,
            envelope: &mut Envelope,
            _link: &AgentLink,
        ) -> Result<(), SseqError> {
            self.log.lock().unwrap().push(format!("{route:?}"));
            match route {
                PairRoute::First => envelope.mark_used(),
                PairRoute::Second => Ok(()),
                PairRoute::Again => {
                    envelope.mark_used()?;
                    if self.double {
                        envelope.mark_used()?;
                    }
                    Ok(())
                }
            }
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum FaultyRoute {
        Boom,
    }

    struct Faulty;

    #[async_trait]
    impl Agent for Faulty {
        type Route = FaultyRoute;

        fn subscriptions(&self) -> Vec<Command> {
            vec![Command::topic("boom")]
        }

        fn routes(&self) -> &'static [(&'static str, FaultyRoute)] {
            &[("boom", FaultyRoute::Boom)]
        }

        async fn handle(
            &self,
            _route: FaultyRoute,
            _envelope: &mut Envelope,
            _link: &AgentLink,
        ) -> Result<(), SseqError> {
            Err(SseqError::Fault("boom".to_string()))
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum PickyRoute {
        SetMode,
    }

    /// 只认识少数模式名，其余按协议错误拒绝
    struct Picky;

    #[async_trait]
    impl Agent for Picky {
        type Route = PickyRoute;

        fn subscriptions(&self) -> Vec<Command> {
            vec![Command::topic("mode")]
        }

        fn routes(&self) -> &'static [(&'static str, PickyRoute)] {
            &[("mode.set", PickyRoute::SetMode)]
        }

        async fn handle(
            &self,
            _route: PickyRoute,
            envelope: &mut Envelope,
            _link: &AgentLink,
        ) -> Result<(), SseqError> {
            envelope.mark_used()?;
            let name: String = envelope.msg.require("mode", 0)?;
            Err(SseqError::UnknownMode(name))
        }
    }

    /// 认领所有子孙故障的中间节点
    struct Guardian {
        caught: Log,
    }

    #[async_trait]
    impl Agent for Guardian {
        type Route = std::convert::Infallible;

        fn subscriptions(&self) -> Vec<Command> {
            vec![Command::wildcard()]
        }

        fn routes(&self) -> &'static [(&'static str, Self::Route)] {
            &[]
        }

        async fn handle(
            &self,
            route: Self::Route,
            _envelope: &mut Envelope,
            _link: &AgentLink,
        ) -> Result<(), SseqError> {
            match route {}
        }

        fn on_fault(&self, fault: &Fault) -> FaultDisposition {
            self.caught.lock().unwrap().push(fault.error.clone());
            FaultDisposition::Handled
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        faults: StdMutex<Vec<Fault>>,
    }

    impl FaultSink for RecordingSink {
        fn report(&self, fault: &Fault) {
            self.faults.lock().unwrap().push(fault.clone());
        }
    }

    fn msg(cmd: &str) -> Message {
        Message::new(Command::topic(cmd))
    }

    async fn tree_with_root() -> (AgentTree, AgentId) {
        let tree = AgentTree::new(Arc::new(LogFaultSink));
        let root = tree
            .attach(None, "root", |_| crate::agent::RootAgent)
            .await
            .unwrap();
        (tree, root)
    }

    #[tokio::test]
    async fn test_inbound_forwards_by_subscription() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        tree.attach(Some(root), "charts", |_| recorder("charts", vec!["chart"], &log))
            .await
            .unwrap();
        tree.attach(Some(root), "display", |_| recorder("display", vec!["display"], &log))
            .await
            .unwrap();

        tree.inject(root, AgentPath::default(), msg("chart.class.add"));
        tree.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["charts:chart.class.add"]);
    }

    #[tokio::test]
    async fn test_inbound_stops_after_consumer() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let mut first = recorder("a", vec!["*"], &log);
        first.consume = true;
        tree.attach(Some(root), "a", |_| first).await.unwrap();
        tree.attach(Some(root), "b", |_| recorder("b", vec!["*"], &log))
            .await
            .unwrap();

        tree.inject(root, AgentPath::default(), msg("click"));
        tree.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["a:click"]);
    }

    #[tokio::test]
    async fn test_first_handler_wins() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let pair = tree
            .attach(Some(root), "pair", |_| Pair {
                log: log.clone(),
                double: false,
            })
            .await
            .unwrap();

        tree.inject(pair, AgentPath::default(), msg("ping"));
        tree.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["First"]);
    }

    #[tokio::test]
    async fn test_double_consume_is_reported() {
        let log = Log::default();
        let sink = Arc::new(RecordingSink::default());
        let tree = AgentTree::new(sink.clone());
        let root = tree
            .attach(None, "root", |_| crate::agent::RootAgent)
            .await
            .unwrap();
        let pair = tree
            .attach(Some(root), "pair", |_| Pair {
                log: log.clone(),
                double: true,
            })
            .await
            .unwrap();

        tree.inject(pair, AgentPath::default(), msg("twice"));
        tree.drain().await;

        let faults = sink.faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].error.contains("consumed twice"));
    }

    #[tokio::test]
    async fn test_outbound_fans_out_to_siblings_not_sender() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let chart = tree
            .attach(Some(root), "chart", |_| recorder("chart", vec!["*"], &log))
            .await
            .unwrap();
        tree.attach(Some(root), "web1", |_| recorder("web1", vec!["chart"], &log))
            .await
            .unwrap();
        tree.attach(Some(root), "web2", |_| recorder("web2", vec!["chart"], &log))
            .await
            .unwrap();
        tree.attach(Some(root), "repl", |_| recorder("repl", vec!["info"], &log))
            .await
            .unwrap();

        tree.send_outbound(chart, msg("chart.node.add")).await.unwrap();
        tree.send_outbound(chart, msg("chart.class.add")).await.unwrap();
        tree.drain().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "web1:chart.node.add",
                "web2:chart.node.add",
                "web1:chart.class.add",
                "web2:chart.class.add",
            ]
        );
    }

    #[tokio::test]
    async fn test_outbound_self_delivery_opt_in() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let mut echo = recorder("echo", vec!["*"], &log);
        echo.own = true;
        let echo = tree.attach(Some(root), "echo", |_| echo).await.unwrap();

        tree.send_outbound(echo, msg("chart.node.add")).await.unwrap();
        tree.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["echo:chart.node.add"]);
    }

    #[tokio::test]
    async fn test_outbound_climbs_to_grandparent_siblings() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let channel = tree
            .attach(Some(root), "channel", |_| recorder("channel", vec!["none"], &log))
            .await
            .unwrap();
        let chart = tree
            .attach(Some(channel), "chart", |_| recorder("chart", vec!["*"], &log))
            .await
            .unwrap();
        tree.attach(Some(root), "repl", |_| recorder("repl", vec!["chart"], &log))
            .await
            .unwrap();

        tree.send_outbound(chart, msg("chart.edge.add")).await.unwrap();
        tree.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["repl:chart.edge.add"]);
    }

    #[tokio::test]
    async fn test_fault_handled_by_ancestor() {
        let caught = Log::default();
        let sink = Arc::new(RecordingSink::default());
        let tree = AgentTree::new(sink.clone());
        let root = tree
            .attach(None, "root", |_| crate::agent::RootAgent)
            .await
            .unwrap();
        let guard = tree
            .attach(Some(root), "guard", |_| Guardian {
                caught: caught.clone(),
            })
            .await
            .unwrap();
        let faulty = tree.attach(Some(guard), "faulty", |_| Faulty).await.unwrap();

        tree.inject(faulty, AgentPath::default(), msg("boom"));
        tree.drain().await;

        assert_eq!(*caught.lock().unwrap(), vec!["Handler fault: boom"]);
        assert!(sink.faults.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unhandled_fault_reaches_sink_and_reports() {
        let log = Log::default();
        let sink = Arc::new(RecordingSink::default());
        let tree = AgentTree::new(sink.clone());
        let root = tree
            .attach(None, "root", |_| crate::agent::RootAgent)
            .await
            .unwrap();
        let faulty = tree.attach(Some(root), "faulty", |_| Faulty).await.unwrap();
        tree.attach(Some(root), "repl", |_| recorder("repl", vec!["error"], &log))
            .await
            .unwrap();

        tree.inject(faulty, AgentPath::new(vec!["web".into()]), msg("boom"));
        tree.drain().await;

        let faults = sink.faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].agent.to_string(), "/root/faulty");
        assert_eq!(faults[0].origin.to_string(), "/web");
        assert_eq!(*log.lock().unwrap(), vec!["repl:error.exception"]);
    }

    #[tokio::test]
    async fn test_detach_removes_subtree() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let mid = tree
            .attach(Some(root), "mid", |_| recorder("mid", vec!["*"], &log))
            .await
            .unwrap();
        let leaf = tree
            .attach(Some(mid), "leaf", |_| recorder("leaf", vec!["*"], &log))
            .await
            .unwrap();

        tree.detach(mid).await.unwrap();

        assert!(!tree.contains(mid).await);
        assert!(!tree.contains(leaf).await);
        assert!(tree.children(root).await.is_empty());

        tree.inject(root, AgentPath::default(), msg("click"));
        tree.drain().await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_root_rejected() {
        let (tree, _root) = tree_with_root().await;
        let err = tree.attach(None, "other", |_| crate::agent::RootAgent).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_handler_pattern_strips_own_name() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let pair = tree
            .attach(Some(root), "pair", |_| Pair {
                log: log.clone(),
                double: false,
            })
            .await
            .unwrap();

        tree.inject(pair, AgentPath::default(), msg("pair.ping"));
        tree.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["First"]);
    }

    #[tokio::test]
    async fn test_protocol_error_goes_only_to_originator() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        tree.attach(Some(root), "picky", |_| Picky).await.unwrap();
        let web1 = tree
            .attach(Some(root), "web1", |_| recorder("web1", vec!["error"], &log))
            .await
            .unwrap();
        tree.attach(Some(root), "web2", |_| recorder("web2", vec!["error"], &log))
            .await
            .unwrap();

        tree.send_outbound(web1, msg("mode.set").with("mode", "FlyMode"))
            .await
            .unwrap();
        tree.drain().await;

        assert_eq!(*log.lock().unwrap(), vec!["web1:error.protocol"]);
    }

    #[tokio::test]
    async fn test_protocol_error_with_unknown_origin_is_dropped() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let picky = tree.attach(Some(root), "picky", |_| Picky).await.unwrap();
        tree.attach(Some(root), "web", |_| recorder("web", vec!["error"], &log))
            .await
            .unwrap();

        tree.inject(
            picky,
            AgentPath::new(vec!["elsewhere".into()]),
            msg("mode.set").with("mode", "FlyMode"),
        );
        tree.drain().await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_by_path() {
        let (tree, root) = tree_with_root().await;
        let log = Log::default();
        let web = tree
            .attach(Some(root), "web", |_| recorder("web", vec!["*"], &log))
            .await
            .unwrap();
        let path = tree.path(web).await.unwrap();
        assert_eq!(tree.resolve(&path).await, Some(web));
        tree.detach(web).await.unwrap();
        assert_eq!(tree.resolve(&path).await, None);
    }

    #[tokio::test]
    async fn test_children_match_remaining_suffix() {
        let log = Log::default();
        let (tree, root) = tree_with_root().await;
        let channel = tree
            .attach(Some(root), "channel", |_| recorder("channel", vec!["none"], &log))
            .await
            .unwrap();
        tree.attach(Some(channel), "pair", |_| Pair {
            log: log.clone(),
            double: false,
        })
        .await
        .unwrap();

        // channel 剥去自己的名字后剩 `pair.ping`，pair 再剥去自己的名字后匹配 `ping`
        tree.inject(channel, AgentPath::default(), msg("channel.pair.ping"));
        tree.drain().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["channel:channel.pair.ping", "First"]
        );
    }
}
