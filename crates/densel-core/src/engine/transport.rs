//! Worker transports.
//!
//! The channel adapter only ever sees a [`WorkerChannels`] pair. A worker is
//! anything that consumes requests from one end and produces replies on the
//! other: an in-process handler on a dedicated thread, or an external engine
//! process speaking newline-delimited JSON.

use super::error::EngineError;
use super::protocol::{CommandPayload, Reply, Request, RequestBody};
use std::process::Stdio;
use std::thread::JoinHandle;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Adapter-side ends of a worker connection.
#[derive(Debug)]
pub struct WorkerChannels {
    pub requests: mpsc::UnboundedSender<Request>,
    pub replies: mpsc::UnboundedReceiver<Reply>,
}

/// Worker-side ends of a worker connection.
#[derive(Debug)]
pub struct WorkerEnd {
    pub requests: mpsc::UnboundedReceiver<Request>,
    pub replies: mpsc::UnboundedSender<Reply>,
}

impl WorkerChannels {
    pub fn pair() -> (WorkerChannels, WorkerEnd) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        (
            WorkerChannels {
                requests: request_tx,
                replies: reply_rx,
            },
            WorkerEnd {
                requests: request_rx,
                replies: reply_tx,
            },
        )
    }
}

/// An in-process compute engine.
pub trait CommandHandler: Send + 'static {
    fn initialize(&mut self, _settings: &serde_json::Value) -> Result<serde_json::Value, String> {
        Ok(serde_json::Value::Null)
    }

    /// Executes one command. `Err` carries the diagnostic of a remote exception.
    fn handle(&mut self, command: &CommandPayload) -> Result<serde_json::Value, String>;

    /// Console output accumulated since the last call, if any.
    fn take_console_output(&mut self) -> Option<String> {
        None
    }
}

/// Executes one request against `handler` and builds the matching reply.
pub fn dispatch<H: CommandHandler + ?Sized>(handler: &mut H, request: &Request) -> Reply {
    let outcome = match &request.body {
        RequestBody::Initialize { settings } => handler.initialize(settings),
        RequestBody::Command(payload) => handler.handle(payload),
        RequestBody::CommandList { commands } => commands
            .iter()
            .map(|payload| handler.handle(payload))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
    };

    let reply = match outcome {
        Ok(result) => Reply::completed(request.message_id, result),
        Err(diagnostic) => Reply::exception(request.message_id, diagnostic),
    };
    match handler.take_console_output() {
        Some(console) if reply.console_message.is_none() => reply.with_console_message(console),
        _ => reply,
    }
}

/// Runs `handler` on a dedicated named thread, processing requests in the
/// order they are received. The thread exits once the request sender is
/// dropped.
pub fn spawn_local_worker<H: CommandHandler>(
    mut handler: H,
) -> Result<(WorkerChannels, JoinHandle<()>), EngineError> {
    let (channels, mut end) = WorkerChannels::pair();
    let handle = std::thread::Builder::new()
        .name("compute-worker".to_string())
        .spawn(move || {
            debug!("Local compute worker started.");
            while let Some(request) = end.requests.blocking_recv() {
                let reply = dispatch(&mut handler, &request);
                if end.replies.send(reply).is_err() {
                    break;
                }
            }
            debug!("Local compute worker stopped.");
        })?;
    Ok((channels, handle))
}

/// A compute engine running as a child process.
#[derive(Debug)]
pub struct ProcessWorker {
    child: Child,
}

impl ProcessWorker {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn shutdown(mut self) -> Result<(), EngineError> {
        self.child.kill().await?;
        Ok(())
    }
}

/// Launches `program` and connects to it over stdin/stdout, one JSON
/// message per line. Engine stderr is forwarded to the log.
pub fn spawn_process_worker(
    program: &str,
    args: &[String],
) -> Result<(WorkerChannels, ProcessWorker), EngineError> {
    info!("Launching compute engine: {} {:?}", program, args);
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| EngineError::Transport("engine stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::Transport("engine stdout unavailable".to_string()))?;
    let stderr = child.stderr.take();

    let (channels, mut end) = WorkerChannels::pair();

    tokio::spawn(async move {
        while let Some(request) = end.requests.recv().await {
            let mut line = match serde_json::to_vec(&request) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Dropping unserializable request {}: {}", request.message_id, e);
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(e) = stdin.write_all(&line).await {
                warn!("Engine stdin closed: {}", e);
                break;
            }
        }
        debug!("Engine request writer finished.");
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Reply>(&line) {
                    Ok(reply) => {
                        if end.replies.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping malformed engine reply ({}): {:.120}", e, line),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed reading engine stdout: {}", e);
                    break;
                }
            }
        }
        debug!("Engine reply reader finished.");
    });

    if let Some(stderr) = stderr {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "densel::engine_stderr", "{}", line);
            }
        });
    }

    Ok((channels, ProcessWorker { child }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::{CommandArg, ReplyStatus, ReturnShape};
    use serde_json::json;
    use uuid::Uuid;

    struct Echo {
        console: Option<String>,
    }

    impl CommandHandler for Echo {
        fn handle(&mut self, command: &CommandPayload) -> Result<serde_json::Value, String> {
            if command.command == "fail" {
                return Err("boom".to_string());
            }
            self.console = Some(format!("ran {}", command.command));
            Ok(json!(command.args.len()))
        }

        fn take_console_output(&mut self) -> Option<String> {
            self.console.take()
        }
    }

    fn payload(name: &str) -> CommandPayload {
        CommandPayload {
            command: name.to_string(),
            return_shape: ReturnShape::Int,
            args: vec![CommandArg::from(1), CommandArg::from(2)],
        }
    }

    #[test]
    fn dispatch_runs_single_command() {
        let mut echo = Echo { console: None };
        let request = Request::new(Uuid::new_v4(), RequestBody::Command(payload("count")));
        let reply = dispatch(&mut echo, &request);
        assert_eq!(reply.message_id, request.message_id);
        assert_eq!(reply.result, json!(2));
        assert_eq!(reply.console_message.as_deref(), Some("ran count"));
    }

    #[test]
    fn dispatch_command_list_stops_at_first_failure() {
        let mut echo = Echo { console: None };
        let request = Request::new(
            Uuid::new_v4(),
            RequestBody::CommandList {
                commands: vec![payload("a"), payload("fail"), payload("b")],
            },
        );
        let reply = dispatch(&mut echo, &request);
        assert_eq!(reply.status, ReplyStatus::Exception);
        assert_eq!(reply.console_message.as_deref(), Some("boom"));
    }

    #[test]
    fn dispatch_command_list_collects_results() {
        let mut echo = Echo { console: None };
        let request = Request::new(
            Uuid::new_v4(),
            RequestBody::CommandList {
                commands: vec![payload("a"), payload("b")],
            },
        );
        assert_eq!(dispatch(&mut echo, &request).result, json!([2, 2]));
    }

    #[tokio::test]
    async fn local_worker_replies_in_receive_order() {
        let (mut channels, handle) = spawn_local_worker(Echo { console: None }).unwrap();
        let ids: Vec<_> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            channels
                .requests
                .send(Request::new(*id, RequestBody::Command(payload("x"))))
                .unwrap();
        }
        for id in &ids {
            assert_eq!(channels.replies.recv().await.unwrap().message_id, *id);
        }
        drop(channels);
        handle.join().unwrap();
    }
}
