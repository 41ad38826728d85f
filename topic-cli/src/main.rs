//! topic-replay - 回放服务器数据包，调试单个主题订阅

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use topic_socket::{
    ChannelConnection, Packet, PacketType, Socket, SocketConfig, ACK_ERROR_EVENT, ACK_EVENT,
    CLOSE_EVENT, ERROR_EVENT, LEAVE_ERROR_EVENT, READY_EVENT,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Topic subscription replay tool
#[derive(Parser, Debug)]
#[command(name = "topic-replay")]
#[command(version, about = "Replay recorded server packets against one topic subscription")]
struct Args {
    /// JSON-lines file with one inbound packet per line
    trace: PathBuf,

    /// Topic to subscribe
    #[arg(short, long)]
    topic: String,

    /// Event to emit before replay, as `event=<json>` (repeatable)
    #[arg(short, long = "emit")]
    emits: Vec<String>,

    /// Request an ack for every emitted event
    #[arg(long, default_value = "false")]
    ack: bool,

    /// Terminate the subscription after replay if it is still alive
    #[arg(long, default_value = "false")]
    terminate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// 解析 `event=<json>`，值不是合法 JSON 时按字符串处理
fn parse_emit(raw: &str) -> Result<(String, Value)> {
    let Some((event, data)) = raw.split_once('=') else {
        bail!("Expected event=<json>, got {:?}", raw);
    };
    if event.is_empty() {
        bail!("Empty event name in {:?}", raw);
    }
    let data = serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()));
    Ok((event.to_string(), data))
}

/// 读取数据包文件，忽略空行和 `#` 注释
fn load_trace(path: &Path) -> Result<Vec<Packet>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            Packet::from_json(line.trim())
                .with_context(|| format!("{}:{}: invalid packet", path.display(), n + 1))
        })
        .collect()
}

/// 数据包中出现的应用层事件名
fn event_names(packets: &[Packet]) -> BTreeSet<String> {
    packets
        .iter()
        .filter(|p| p.t == PacketType::Event)
        .filter_map(|p| p.d.get("event").and_then(Value::as_str))
        .filter(|name| *name != ACK_EVENT && *name != ACK_ERROR_EVENT)
        .map(str::to_string)
        .collect()
}

fn print_listener(socket: &Socket, event: &str) {
    let name = event.to_string();
    socket.on(event, move |data| {
        let name = name.clone();
        async move {
            info!("<- {}: {}", name, data);
            Ok(())
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let packets = load_trace(&args.trace)?;
    info!("Loaded {} packet(s) for {} topic", packets.len(), args.topic);

    let (connection, mut outbound) = ChannelConnection::channel();
    let socket = Socket::with_config(&args.topic, Arc::new(connection), SocketConfig::default());

    // 打印所有出站数据包
    let printer = tokio::spawn(async move {
        while let Some(packet) = outbound.recv().await {
            match packet.to_json() {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to encode outbound packet: {}", e),
            }
        }
    });

    for event in [READY_EVENT, ERROR_EVENT, LEAVE_ERROR_EVENT, CLOSE_EVENT] {
        print_listener(&socket, event);
    }
    for event in event_names(&packets) {
        print_listener(&socket, &event);
    }

    for raw in &args.emits {
        let (event, data) = parse_emit(raw)?;
        if args.ack {
            let name = event.clone();
            socket.emit_with_callback(event, data, move |result| match result {
                Ok(data) => info!("Ack for {}: {}", name, data),
                Err(e) => warn!("Ack error for {}: {}", name, e),
            })?;
        } else {
            socket.emit(event, data)?;
        }
    }

    for packet in packets {
        if let Err(e) = socket.handle_packet(packet).await {
            warn!("Skipping packet: {}", e);
        }
    }

    if args.terminate && !socket.state().is_terminal() {
        socket.terminate().await;
    }

    info!("Final state: {} ({} ack(s) pending)", socket.state(), socket.pending_acks());

    // 释放连接发送端，等待打印任务结束
    drop(socket);
    let _ = printer.await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_emit() {
        assert_eq!(parse_emit("msg=\"a\"").unwrap(), ("msg".to_string(), json!("a")));
        assert_eq!(
            parse_emit("move={\"x\":1}").unwrap(),
            ("move".to_string(), json!({"x": 1}))
        );
        // 非 JSON 按字符串处理
        assert_eq!(parse_emit("msg=hello").unwrap(), ("msg".to_string(), json!("hello")));
        assert!(parse_emit("msg").is_err());
        assert!(parse_emit("=1").is_err());
    }

    #[test]
    fn test_load_trace() {
        let mut trace = NamedTempFile::new().unwrap();
        writeln!(trace, "# recorded session").unwrap();
        writeln!(trace, r#"{{"t":3,"d":{{"topic":"chat"}}}}"#).unwrap();
        writeln!(trace).unwrap();
        writeln!(
            trace,
            r#"{{"t":7,"d":{{"topic":"chat","event":"message","data":"hi"}}}}"#
        )
        .unwrap();
        trace.flush().unwrap();

        let packets = load_trace(trace.path()).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], Packet::join_ack("chat"));
        assert_eq!(packets[1].t, PacketType::Event);
    }

    #[test]
    fn test_load_trace_reports_line() {
        let mut trace = NamedTempFile::new().unwrap();
        writeln!(trace, r#"{{"t":3,"d":{{"topic":"chat"}}}}"#).unwrap();
        writeln!(trace, r#"{{"t":3}}"#).unwrap();
        trace.flush().unwrap();

        let err = load_trace(trace.path()).unwrap_err();
        assert!(format!("{}", err).ends_with(":2: invalid packet"));
    }

    #[test]
    fn test_event_names_skip_acks() {
        let packets = vec![
            Packet::join_ack("chat"),
            Packet::event("chat", "message", json!(1), None),
            Packet::event("chat", ACK_EVENT, json!({"id": 0}), None),
            Packet::event("chat", "typing", json!(true), None),
            Packet::event("chat", "message", json!(2), None),
        ];
        let names: Vec<_> = event_names(&packets).into_iter().collect();
        assert_eq!(names, vec!["message".to_string(), "typing".to_string()]);
    }

    #[tokio::test]
    async fn test_replay_flushes_buffer_to_channel() {
        let (connection, mut outbound) = ChannelConnection::channel();
        let socket = Socket::new("chat", Arc::new(connection));
        socket.emit("msg", json!("a")).unwrap();

        socket.handle_packet(Packet::join_ack("chat")).await.unwrap();

        let packet = outbound.recv().await.unwrap();
        assert_eq!(packet, Packet::event("chat", "msg", json!("a"), None));
    }
}
