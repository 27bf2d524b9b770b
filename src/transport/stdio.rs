//! JSON 行协议
//!
//! 每行一个 `{"cmd": "...", "args": [...], "kwargs": {...}}`。读入的行先按类型注册表校验，
//! 不合法的行直接以 `error.protocol` 回写给发送方，不进入树。

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentId, AgentTree};
use crate::core::SseqError;
use crate::message::wire::validate_payload;
use crate::message::{Command, Message};

/// 解析并校验一行输入
pub fn parse_line(line: &str) -> Result<Message, SseqError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| SseqError::MalformedMessage(e.to_string()))?;
    if let Some(kwargs) = value.get("kwargs") {
        validate_payload(kwargs)?;
    }
    if let Some(args) = value.get("args") {
        validate_payload(args)?;
    }
    serde_json::from_value(value).map_err(|e| SseqError::MalformedMessage(e.to_string()))
}

/// 逐行读取，以 `observer` 的名义发出；返回成功投递的行数
///
/// 输入结束或 token 取消时返回。解析失败的行通过 `errors` 回写。
pub async fn pump_lines<R>(
    reader: R,
    tree: AgentTree,
    observer: AgentId,
    errors: mpsc::UnboundedSender<Message>,
    token: CancellationToken,
) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut delivered = 0;
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Input read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(&line) {
            Ok(msg) => {
                tracing::debug!(command = %msg.cmd, "Input message");
                match tree.send_outbound(observer, msg).await {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!("Observer detached, stopping input: {}", e);
                        break;
                    }
                }
            }
            Err(err) => {
                tracing::warn!("Rejected input line: {}", err);
                let report = Message::new(Command::topic("error.protocol"))
                    .with("command", Value::Null)
                    .with("msg", err.to_string());
                let _ = errors.send(report);
            }
        }
    }
    delivered
}

/// 把通道中的消息写成 JSON 行；通道关闭或 token 取消时返回（返回写出条数）
pub async fn write_lines<W>(
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut writer: W,
    token: CancellationToken,
) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => {
                // 取消前已入队的消息仍然写出
                while let Ok(msg) = rx.try_recv() {
                    write_message(&mut writer, &msg).await?;
                    written += 1;
                }
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        write_message(&mut writer, &msg).await?;
        written += 1;
    }
    Ok(written)
}

async fn write_message<W>(writer: &mut W, msg: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agent::{LogFaultSink, RootAgent};
    use crate::transport::ChannelObserver;

    #[test]
    fn test_parse_line_rejects_unknown_type() {
        let err = parse_line(r#"{"cmd":"click","kwargs":{"chart_class":{"type":"Mystery"}}}"#)
            .unwrap_err();
        assert!(matches!(err, SseqError::UnknownType(t) if t == "Mystery"));
    }

    #[test]
    fn test_parse_line_malformed() {
        assert!(matches!(
            parse_line("{not json"),
            Err(SseqError::MalformedMessage(_))
        ));
        assert!(matches!(
            parse_line(r#"{"cmd":"a..b"}"#),
            Err(SseqError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_parse_line_positional_args() {
        let msg = parse_line(r#"{"cmd":"click","args":[1.1,2.0]}"#).unwrap();
        assert_eq!(msg.cmd.to_string(), "click");
        assert_eq!(msg.require::<f64>("x", 0).unwrap(), 1.1);
        assert_eq!(msg.require::<f64>("y", 1).unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_pump_forwards_to_siblings() {
        let tree = AgentTree::new(Arc::new(LogFaultSink));
        let root = tree.attach(None, "root", |_| RootAgent).await.unwrap();
        let (input, _input_rx) = ChannelObserver::channel();
        let input = tree.attach(Some(root), "stdio", |_| input).await.unwrap();
        let (listener, mut rx) = ChannelObserver::channel();
        tree.attach(Some(root), "listener", |_| listener.with_subscriptions(&["click"]))
            .await
            .unwrap();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();

        let data = b"{\"cmd\":\"click\",\"kwargs\":{\"x\":1,\"y\":2}}\n\n{broken\n";
        let delivered = pump_lines(&data[..], tree.clone(), input, err_tx, CancellationToken::new()).await;
        tree.drain().await;

        assert_eq!(delivered, 1);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.kwargs["x"], 1);
        let err = err_rx.try_recv().unwrap();
        assert_eq!(err.cmd.to_string(), "error.protocol");
    }

    #[tokio::test]
    async fn test_write_lines_until_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Message::new(Command::topic("chart.node.add")).with("idx", 1))
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let written = write_lines(rx, &mut out, CancellationToken::new()).await.unwrap();
        assert_eq!(written, 1);
        let line = String::from_utf8(out).unwrap();
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["cmd"], "chart.node.add");
        assert_eq!(value["kwargs"]["idx"], 1);
    }
}
