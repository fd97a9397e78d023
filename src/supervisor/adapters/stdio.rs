//! Line-oriented stdio adapter.
//!
//! Reads slash commands from stdin, turns them into bus traffic through the
//! `console` client endpoint, and prints every broadcast seen on the bus.

use std::io::IsTerminal;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::subsystems::agents::Requester;
use crate::supervisor::AgentSystem;
use crate::supervisor::bus::{MessageBus, Subscription, Topic};
use crate::supervisor::message::Message;
use crate::supervisor::registry::Registry;

/// Endpoint name the adapter registers under.
pub const CONSOLE: &str = "console";

pub fn start(system: &AgentSystem) -> Result<JoinHandle<()>, AppError> {
    let console = Console::new(system)?;
    let broadcasts = system.bus().subscribe(Topic::All);
    let interactive = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();

    info!(interactive, "stdio adapter connected");
    Ok(tokio::spawn(run(console, broadcasts, interactive)))
}

/// What the console needs to act on a parsed command.
struct Console {
    requester: Requester,
    bus: MessageBus,
    registry: Registry,
    shutdown: CancellationToken,
}

enum Flow {
    Continue,
    Exit,
}

impl Console {
    fn new(system: &AgentSystem) -> Result<Self, AppError> {
        Ok(Self {
            requester: system.client(CONSOLE)?,
            bus: system.bus().clone(),
            registry: system.registry().clone(),
            shutdown: system.shutdown_token(),
        })
    }

    fn execute(&self, command: Command) -> Flow {
        match command {
            Command::Help => print_usage(),
            Command::Exit => {
                info!("exit requested from stdio");
                self.shutdown.cancel();
                return Flow::Exit;
            }
            Command::Agents => println!("agents: {}", self.registry.names().join(", ")),
            Command::Status => {
                for info in self.registry.snapshot() {
                    println!("{}", info.summary());
                }
            }
            Command::Send(message) => {
                // Sent without a sender, so a correlated reply is broadcast and printed.
                self.bus.send(message);
                println!("sent");
            }
            Command::Request { agent, kind, payload } => {
                self.spawn_request(agent, kind, payload);
            }
        }
        Flow::Continue
    }

    /// Runs off the input loop so broadcasts and shutdown stay live while
    /// the request is outstanding.
    fn spawn_request(&self, agent: String, kind: String, payload: Value) -> JoinHandle<()> {
        let requester = self.requester.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = requester.request_agent(&agent, &kind, payload) => match result {
                    Ok(response) => println!("{}", pretty(&response.to_value())),
                    Err(e) => eprintln!("request error: {e}"),
                },
            }
        })
    }
}

async fn run(console: Console, mut broadcasts: Subscription, interactive: bool) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if interactive {
            print!("> ");
            use std::io::Write as _;
            let _ = std::io::stdout().flush();
        }

        tokio::select! {
            biased;

            _ = console.shutdown.cancelled() => {
                info!("stdio adapter shutting down");
                break;
            }

            Some(message) = broadcasts.recv() => print_broadcast(&message),

            line = lines.next_line() => {
                let input = match line {
                    Ok(Some(l)) => l,
                    Ok(None) => {
                        info!("stdio adapter stdin closed");
                        console.shutdown.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!("stdio adapter read error: {e}");
                        console.shutdown.cancel();
                        break;
                    }
                };

                match parse_command(&input) {
                    Ok(None) => {}
                    Ok(Some(command)) => {
                        if let Flow::Exit = console.execute(command) {
                            break;
                        }
                    }
                    Err(e) => {
                        eprintln!("{e}");
                        print_usage();
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    Request { agent: String, kind: String, payload: Value },
    Send(Message),
    Status,
    Agents,
    Exit,
    Help,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let Some(cmdline) = trimmed.strip_prefix('/') else {
        return Err("expected slash command (first non-whitespace character must be '/')".to_string());
    };

    let mut parts = cmdline.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match command {
        "request" => {
            let mut args = rest.splitn(3, char::is_whitespace);
            let agent = args.next().unwrap_or_default().trim();
            let kind = args.next().unwrap_or_default().trim();
            if agent.is_empty() || kind.is_empty() {
                return Err("usage: /request <agent> <type> [json]".to_string());
            }
            let payload = match args.next().map(str::trim).filter(|s| !s.is_empty()) {
                Some(raw) => serde_json::from_str(raw).map_err(|e| format!("invalid json payload: {e}"))?,
                None => Value::Object(Default::default()),
            };
            Ok(Some(Command::Request {
                agent: agent.to_string(),
                kind: kind.to_string(),
                payload,
            }))
        }
        "send" => {
            if rest.is_empty() {
                return Err("usage: /send <json message>".to_string());
            }
            let message: Message = serde_json::from_str(rest).map_err(|e| format!("invalid message: {e}"))?;
            Ok(Some(Command::Send(message)))
        }
        "status" => ensure_no_args(rest, Command::Status),
        "agents" => ensure_no_args(rest, Command::Agents),
        "exit" => ensure_no_args(rest, Command::Exit),
        "help" => ensure_no_args(rest, Command::Help),
        "" => Err("usage: /<command> [args]".to_string()),
        other => Err(format!("unknown command: /{other}")),
    }
}

fn ensure_no_args(rest: &str, command: Command) -> Result<Option<Command>, String> {
    if rest.is_empty() {
        Ok(Some(command))
    } else {
        Err("unexpected arguments".to_string())
    }
}

fn print_usage() {
    eprintln!("commands:");
    eprintln!("  /request <agent> <type> [json]");
    eprintln!("  /send <json message>");
    eprintln!("  /status");
    eprintln!("  /agents");
    eprintln!("  /exit");
    eprintln!("  /help");
}

fn print_broadcast(message: &Message) {
    let payload = message.payload.as_ref().map(pretty).unwrap_or_default();
    println!("[{}] from {}: {payload}", message.kind, message.sender().unwrap_or("external"));
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::config::BusConfig;
    use crate::error::AgentError;
    use crate::services::SystemContext;
    use crate::subsystems::agents::{Agent, AgentContext, HandleFuture};
    use crate::supervisor::message::{AGENT_RESPONSE, AgentResponse};

    /// Answers `ping` after `delay`.
    struct Pong {
        delay: Duration,
    }

    impl Agent for Pong {
        fn name(&self) -> &str {
            "pong"
        }

        fn handle(self: Arc<Self>, message: Message, _ctx: AgentContext) -> HandleFuture {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                match message.kind.as_str() {
                    "ping" => Ok(AgentResponse::ok(json!("pong"))),
                    other => Err(AgentError::invalid(format!("no {other}"))),
                }
            })
        }
    }

    fn console_with_pong(delay: Duration) -> (AgentSystem, Console) {
        let mut system = AgentSystem::new(SystemContext::in_memory(None), BusConfig::default());
        system.spawn(Arc::new(Pong { delay })).unwrap();
        let console = Console::new(&system).unwrap();
        (system, console)
    }

    #[tokio::test]
    async fn correlated_send_reply_reaches_console_broadcasts() {
        let (system, console) = console_with_pong(Duration::ZERO);
        let mut responses = system.bus().subscribe(Topic::of(AGENT_RESPONSE));

        let command = parse_command(r#"/send {"type":"ping","recipient":"pong","correlationId":"c1"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(console.execute(command), Flow::Continue));

        let reply = tokio::time::timeout(Duration::from_secs(2), responses.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("c1"));
        assert_eq!(reply.sender(), Some("pong"));
        assert_eq!(reply.payload.unwrap()["data"], "pong");
        system.shutdown().await;
    }

    #[tokio::test]
    async fn request_does_not_block_the_console() {
        let (system, console) = console_with_pong(Duration::from_secs(5));
        let task = console.spawn_request("pong".into(), "ping".into(), json!({}));

        // The console is free immediately; shutdown ends the outstanding request.
        while console.requester.pending_len() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());
        console.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        system.shutdown().await;
    }

    #[tokio::test]
    async fn exit_cancels_shutdown() {
        let (system, console) = console_with_pong(Duration::ZERO);
        assert!(matches!(console.execute(Command::Exit), Flow::Exit));
        assert!(console.shutdown.is_cancelled());
        system.shutdown().await;
    }

    #[test]
    fn parse_request_with_payload() {
        match parse_command(r#"/request utility apply_text_effect {"text":"hi","effect":"bold"}"#) {
            Ok(Some(Command::Request { agent, kind, payload })) => {
                assert_eq!(agent, "utility");
                assert_eq!(kind, "apply_text_effect");
                assert_eq!(payload, json!({ "text": "hi", "effect": "bold" }));
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn parse_request_without_payload_defaults_to_empty_object() {
        match parse_command("/request utility generate_id") {
            Ok(Some(Command::Request { payload, .. })) => assert_eq!(payload, json!({})),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn parse_request_needs_agent_and_type() {
        assert!(parse_command("/request utility").unwrap_err().contains("usage"));
        assert!(parse_command("/request utility x {bad").unwrap_err().contains("invalid json"));
    }

    #[test]
    fn parse_send_ignores_sender_field() {
        match parse_command(r#"/send {"type":"context_changed","sender":"spoof","payload":{"context":"rust"}}"#) {
            Ok(Some(Command::Send(message))) => {
                assert_eq!(message.kind, "context_changed");
                assert_eq!(message.sender(), None);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn parse_requires_slash_prefix() {
        let err = parse_command("hello").expect_err("non-command input should fail");
        assert!(err.contains("first non-whitespace"));
    }

    #[test]
    fn parse_simple_commands() {
        assert!(matches!(parse_command("  /status"), Ok(Some(Command::Status))));
        assert!(matches!(parse_command("/agents"), Ok(Some(Command::Agents))));
        assert!(matches!(parse_command("/exit"), Ok(Some(Command::Exit))));
        assert!(parse_command("/exit now").is_err());
        assert!(parse_command("/bogus").unwrap_err().contains("unknown command"));
        assert!(matches!(parse_command("   "), Ok(None)));
    }
}
