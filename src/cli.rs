//! Command-line interface and REPL

use anyhow::{anyhow, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sysex_bridge::bridge::Bridge;
use sysex_bridge::config::MidiConfig;
use sysex_bridge::dispatcher::Reply;
use sysex_bridge::error::BridgeError;
use sysex_bridge::feedback::{Unsolicited, UnsolicitedKind};
use sysex_bridge::protocol::{Command, Payload};
use sysex_bridge::transport::{resolve_ports, MidiBackend};

/// One `send` invocation, from argv or a REPL line
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub command: Command,
    pub params: Payload,
    pub wait: bool,
    pub timeout: Option<Duration>,
}

/// Resolve a command by snake_case name or `0x..` id
pub fn parse_command(token: &str) -> Result<Command> {
    let token = token.trim();
    let by_id = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .and_then(Command::from_id);

    by_id
        .or_else(|| Command::from_name(token))
        .ok_or_else(|| anyhow!("Unknown command '{}' (try `commands`)", token))
}

/// Turn `key=value` tokens into a payload
///
/// Values are read as JSON when they parse as JSON (numbers, booleans,
/// quoted strings) and as plain strings otherwise.
pub fn parse_params<S: AsRef<str>>(tokens: &[S]) -> Result<Payload> {
    let mut payload = Payload::new();
    for token in tokens {
        let token = token.as_ref();
        let (key, raw) = token
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected key=value, got '{}'", token))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Empty key in '{}'", token));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        payload.insert(key.to_string(), value);
    }
    Ok(payload)
}

/// Parse a REPL `send` line (without the leading `send`)
pub fn parse_send_line(tokens: &[&str]) -> Result<SendRequest> {
    let (name, rest) = tokens
        .split_first()
        .ok_or_else(|| anyhow!("Usage: send <command> [key=value ...] [--no-wait] [--timeout-ms N]"))?;

    let mut wait = true;
    let mut timeout = None;
    let mut params = Vec::new();
    let mut iter = rest.iter();
    while let Some(&token) = iter.next() {
        match token {
            "--no-wait" => wait = false,
            "--timeout-ms" => {
                let raw = iter.next().ok_or_else(|| anyhow!("--timeout-ms needs a value"))?;
                let ms: u64 = raw
                    .parse()
                    .with_context(|| format!("Invalid timeout '{}'", raw))?;
                timeout = Some(Duration::from_millis(ms));
            }
            _ => params.push(token),
        }
    }

    Ok(SendRequest {
        command: parse_command(name)?,
        params: parse_params(&params)?,
        wait,
        timeout,
    })
}

/// Print every port the backend sees, marking the ones the config selects
pub fn list_ports_formatted(backend: &dyn MidiBackend, midi: &MidiConfig) {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    let selected = resolve_ports(backend, midi);

    let sections = [
        ("Input Ports:", backend.input_ports(), selected.input.as_deref()),
        ("Output Ports:", backend.output_ports(), selected.output.as_deref()),
    ];
    for (title, ports, chosen) in sections {
        println!("\n{}", title.bold());
        match ports {
            Ok(ports) if ports.is_empty() => println!("  {}", "No ports found".dimmed()),
            Ok(ports) => {
                for port in ports {
                    if Some(port.as_str()) == chosen {
                        println!("  {} {}", "[SELECTED]".bright_green(), port.bright_white());
                    } else {
                        println!("  {} {}", "          ".normal(), port);
                    }
                }
            }
            Err(e) => println!("  {}", format!("Listing failed: {}", e).red()),
        }
    }

    println!();
}

fn print_payload(payload: &Payload) {
    let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| format!("{:?}", payload));
    for line in pretty.lines() {
        println!("  {}", line);
    }
}

/// Print the outcome of one command
pub fn print_outcome(command: Command, result: &Result<Reply, BridgeError>) {
    match result {
        Ok(Reply::Sent) => println!("{} {}", "SENT".green().bold(), command),
        Ok(Reply::Success(payload)) => {
            println!("{} {}", "OK".green().bold(), command);
            print_payload(payload);
        }
        Err(BridgeError::Remote { message, .. }) => {
            println!("{} {}: {}", "REJECTED".red().bold(), command, message)
        }
        Err(BridgeError::Timeout { request_id, waited }) => println!(
            "{} {} (request {}, waited {:?})",
            "TIMEOUT".yellow().bold(),
            command,
            request_id,
            waited
        ),
        Err(e) if e.is_send_failure() => println!("{} {}: {}", "NOT SENT".red().bold(), command, e),
        Err(e) => println!("{} {}: {}", "ERROR".red().bold(), command, e),
    }
}

pub fn print_unsolicited(msg: &Unsolicited) {
    let label = match &msg.kind {
        UnsolicitedKind::AsyncUpdate => "ASYNC".cyan().bold(),
        UnsolicitedKind::StaleResponse => "STALE".yellow().bold(),
        UnsolicitedKind::Unexpected => "UNEXPECTED".yellow().bold(),
        UnsolicitedKind::Malformed(_) => "MALFORMED".red().bold(),
    };
    let command = Command::from_id(msg.command_id)
        .map(|c| c.to_string())
        .unwrap_or_else(|| format!("0x{:02X}", msg.command_id));
    println!(
        "[{}] {} {}",
        msg.received_at.format("%H:%M:%S%.3f").to_string().dimmed(),
        label,
        command
    );
    if let UnsolicitedKind::Malformed(e) = &msg.kind {
        println!("  {}", e.to_string().red());
    } else if !msg.payload.is_empty() {
        print_payload(&msg.payload);
    }
}

/// Execute one send request off the async runtime
///
/// A failed blocking task is reported as its own error: whether the frame
/// left is unknown at that point.
pub async fn run_send(bridge: Arc<Bridge>, request: SendRequest) -> Result<Reply> {
    let command = request.command;
    let result = tokio::task::spawn_blocking(move || {
        bridge
            .dispatcher()
            .execute(request.command, Some(request.params), request.wait, request.timeout)
    })
    .await
    .context("send task failed")?;

    print_outcome(command, &result);
    Ok(result?)
}

/// Print unsolicited traffic until `shutdown` resolves
///
/// Returns how many messages were printed.
pub async fn watch(bridge: Arc<Bridge>, shutdown: impl Future<Output = ()>) -> Result<usize> {
    println!("{}", "Watching for unsolicited messages (Ctrl+C to stop)".bold());
    tokio::pin!(shutdown);

    let spawn_drain = |bridge: &Arc<Bridge>| {
        let correlator = bridge.correlator().clone();
        tokio::task::spawn_blocking(move || {
            correlator.drain_unsolicited(true, Some(Duration::from_millis(250)))
        })
    };

    let mut printed = 0;
    let mut next = spawn_drain(&bridge);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            msg = &mut next => {
                if let Some(msg) = msg.context("watch task failed")? {
                    print_unsolicited(&msg);
                    printed += 1;
                }
                next = spawn_drain(&bridge);
            }
        }
    }

    // The in-flight drain may already hold a message; it returns within its timeout
    if let Some(msg) = next.await.context("watch task failed")? {
        print_unsolicited(&msg);
        printed += 1;
    }
    while let Some(msg) = bridge.correlator().drain_unsolicited(false, None) {
        print_unsolicited(&msg);
        printed += 1;
    }

    Ok(printed)
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  send <command> [key=value ...] [--no-wait] [--timeout-ms N]");
    println!("  pending        number of requests awaiting a response");
    println!("  unsolicited    print queued async/stale/malformed messages");
    println!("  status         port and listener state");
    println!("  commands       list protocol commands");
    println!("  quit");
}

fn print_commands() {
    for command in Command::ALL.iter().filter(|c| !c.is_reply()) {
        println!("  0x{:02X}  {}", command.id(), command.name());
    }
}

pub async fn run_repl(bridge: Arc<Bridge>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    print_help();

    loop {
        let line = match rl.readline("bridge> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, rest)) = tokens.split_first() else {
            continue;
        };
        let _ = rl.add_history_entry(line.as_str());

        match head {
            "quit" | "exit" => break,
            "help" => print_help(),
            "commands" => print_commands(),
            "pending" => println!("{} pending", bridge.correlator().pending_count()),
            "status" => {
                let status = bridge.transport().status();
                println!("  output:   {} (open: {})", status.output_port.as_deref().unwrap_or("none"), status.output_open);
                println!("  input:    {} ({:?})", status.input_port.as_deref().unwrap_or("none"), status.listener);
                println!("  frames:   {} sent, {} received", status.frames_sent, status.frames_received);
            }
            "unsolicited" => {
                let mut count = 0;
                while let Some(msg) = bridge.correlator().drain_unsolicited(false, None) {
                    print_unsolicited(&msg);
                    count += 1;
                }
                if count == 0 {
                    println!("{}", "No unsolicited messages".dimmed());
                }
            }
            "send" => match parse_send_line(rest) {
                Ok(request) => {
                    if let Err(e) = run_send(bridge.clone(), request).await {
                        // Bridge errors were already printed with the outcome
                        if e.downcast_ref::<BridgeError>().is_none() {
                            println!("{}", format!("{:#}", e).red());
                        }
                    }
                }
                Err(e) => println!("{}", e.to_string().red()),
            },
            other => println!("{} '{}' (type `help`)", "Unknown command".red(), other),
        }
    }

    Ok(())
}
