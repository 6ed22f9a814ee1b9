use super::config::ChannelConfig;
use super::error::EngineError;
use super::events::{EngineEvent, EventReporter};
use super::protocol::{CorrelationId, Reply, Request, RequestBody};
use super::transport::WorkerChannels;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

type Resolver = oneshot::Sender<Result<Reply, EngineError>>;

struct PendingRequest {
    command: String,
    issued_at: Instant,
    resolver: Resolver,
}

struct Shared {
    in_flight: Mutex<HashMap<CorrelationId, PendingRequest>>,
    active: watch::Sender<usize>,
    reporter: EventReporter<'static>,
    max_console_message_len: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingRequest>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the current count. Must be called with the `in_flight` guard
    /// held so the watch value never trails the map.
    fn store_active(&self, in_flight: &HashMap<CorrelationId, PendingRequest>) -> usize {
        let active = in_flight.len();
        self.active.send_replace(active);
        active
    }

    fn report_active(&self, active: usize) {
        self.reporter.report(EngineEvent::BusyChanged { active });
    }

    fn take(&self, id: &CorrelationId) -> Option<PendingRequest> {
        let (pending, remaining) = {
            let mut in_flight = self.lock();
            let pending = in_flight.remove(id);
            let remaining = pending.is_some().then(|| self.store_active(&in_flight));
            (pending, remaining)
        };
        if let Some(remaining) = remaining {
            self.report_active(remaining);
        }
        pending
    }

    fn resolve(&self, reply: Reply) {
        let Some(pending) = self.take(&reply.message_id) else {
            warn!(
                "Discarding reply for unknown or expired request {}.",
                reply.message_id
            );
            return;
        };
        let id = reply.message_id;
        trace!(
            "Reply for '{}' ({}) after {:?}.",
            pending.command,
            id,
            pending.issued_at.elapsed()
        );

        let console = reply
            .console_message
            .as_deref()
            .map(|m| truncate_diagnostic(m, self.max_console_message_len));
        if let Some(message) = &console {
            self.reporter
                .report(EngineEvent::ConsoleMessage(message.clone()));
        }

        let result = if reply.is_completed() {
            Ok(Reply {
                console_message: console,
                ..reply
            })
        } else {
            Err(EngineError::Remote {
                command: pending.command.clone(),
                diagnostic: console.unwrap_or_else(|| "unknown error".to_string()),
            })
        };

        self.reporter.report(EngineEvent::CommandExit {
            id,
            command: pending.command,
            ok: result.is_ok(),
        });
        if pending.resolver.send(result).is_err() {
            debug!("Caller for {} stopped waiting before the reply arrived.", id);
        }
    }

    /// Drops every pending resolver; their callers observe a closed channel.
    fn abandon_all(&self) {
        let abandoned = {
            let mut in_flight = self.lock();
            let abandoned = std::mem::take(&mut *in_flight);
            if !abandoned.is_empty() {
                self.store_active(&in_flight);
            }
            abandoned
        };
        if !abandoned.is_empty() {
            debug!("Abandoning {} in-flight request(s).", abandoned.len());
            self.report_active(0);
        }
    }
}

pub fn truncate_diagnostic(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

/// Multiplexes concurrent requests over one worker connection.
///
/// Each request is registered under a fresh correlation id before it is
/// posted; a background task routes every reply to the caller waiting on
/// that id. Completion order is whatever the worker produces.
pub struct ChannelAdapter {
    requests: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Option<Duration>,
}

impl ChannelAdapter {
    /// Connects to a worker. Must be called from within a tokio runtime.
    pub fn new(
        channels: WorkerChannels,
        config: &ChannelConfig,
        reporter: EventReporter<'static>,
    ) -> Self {
        let (active, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            in_flight: Mutex::new(HashMap::new()),
            active,
            reporter,
            max_console_message_len: config.max_console_message_len,
        });

        let WorkerChannels {
            requests,
            mut replies,
        } = channels;
        let dispatch_shared = shared.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                dispatch_shared.resolve(reply);
            }
            debug!("Worker reply stream closed.");
            dispatch_shared.abandon_all();
        });

        Self {
            requests: Mutex::new(Some(requests)),
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
            request_timeout: config.request_timeout,
        }
    }

    /// Registers and posts a request, returning a handle to its reply.
    ///
    /// The request is on its way to the worker when this returns, so the
    /// order of `post` calls is the order the worker receives them.
    pub fn post(&self, body: RequestBody) -> Result<PendingReply, EngineError> {
        let command = body.label();
        let sender = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| EngineError::ChannelClosed {
                command: command.clone(),
            })?;

        let (resolver, receiver) = oneshot::channel();
        let (id, active) = {
            let mut in_flight = self.shared.lock();
            let mut id = Uuid::new_v4();
            while in_flight.contains_key(&id) {
                id = Uuid::new_v4();
            }
            in_flight.insert(
                id,
                PendingRequest {
                    command: command.clone(),
                    issued_at: Instant::now(),
                    resolver,
                },
            );
            (id, self.shared.store_active(&in_flight))
        };
        self.shared.report_active(active);
        self.shared.reporter.report(EngineEvent::CommandStart {
            id,
            command: command.clone(),
        });

        if sender.send(Request::new(id, body)).is_err() {
            self.shared.take(&id);
            return Err(EngineError::ChannelClosed { command });
        }
        trace!("Posted '{}' as {}.", command, id);

        Ok(PendingReply {
            id,
            command,
            receiver,
            timeout: self.request_timeout,
            shared: self.shared.clone(),
        })
    }

    pub async fn send(&self, body: RequestBody) -> Result<Reply, EngineError> {
        self.post(body)?.wait().await
    }

    /// Resolves a pending request with [`EngineError::Cancelled`]. Returns
    /// `false` if the request already completed.
    pub fn cancel(&self, id: CorrelationId) -> bool {
        match self.shared.take(&id) {
            Some(pending) => {
                debug!("Cancelling '{}' ({}).", pending.command, id);
                let _ = pending.resolver.send(Err(EngineError::Cancelled {
                    command: pending.command,
                }));
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn subscribe_in_flight(&self) -> watch::Receiver<usize> {
        self.shared.active.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Closes the worker connection. No further replies are delivered and
    /// every pending caller observes [`EngineError::ChannelClosed`].
    pub fn shutdown(&self) {
        let sender = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        if let Some(dispatcher) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            dispatcher.abort();
        }
        self.shared.abandon_all();
        debug!("Channel adapter shut down.");
    }
}

impl Drop for ChannelAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A request that has been posted and awaits its reply.
#[must_use = "a pending reply does nothing unless waited on"]
pub struct PendingReply {
    id: CorrelationId,
    command: String,
    receiver: oneshot::Receiver<Result<Reply, EngineError>>,
    timeout: Option<Duration>,
    shared: Arc<Shared>,
}

impl PendingReply {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub async fn wait(self) -> Result<Reply, EngineError> {
        let PendingReply {
            id,
            command,
            receiver,
            timeout,
            shared,
        } = self;

        let received = match timeout {
            None => receiver.await,
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    if shared.take(&id).is_some() {
                        warn!("'{}' ({}) timed out after {:?}.", command, id, limit);
                    }
                    return Err(EngineError::Timeout {
                        command,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
        };

        received.unwrap_or(Err(EngineError::ChannelClosed { command }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::{CommandArg, CommandPayload, ReturnShape};
    use crate::engine::transport::WorkerEnd;
    use serde_json::json;

    fn adapter(config: ChannelConfig) -> (ChannelAdapter, WorkerEnd) {
        let (channels, end) = WorkerChannels::pair();
        (
            ChannelAdapter::new(channels, &config, EventReporter::new()),
            end,
        )
    }

    fn command(name: &str, arg: i64) -> RequestBody {
        RequestBody::Command(CommandPayload {
            command: name.to_string(),
            return_shape: ReturnShape::Int,
            args: vec![CommandArg::from(arg)],
        })
    }

    fn arg_of(request: &Request) -> serde_json::Value {
        match &request.body {
            RequestBody::Command(p) => match &p.args[0] {
                CommandArg::Value(v) => v.clone(),
                CommandArg::Bytes(_) => panic!("unexpected bytes"),
            },
            _ => panic!("unexpected body"),
        }
    }

    #[tokio::test]
    async fn out_of_order_replies_reach_their_own_callers() {
        let (adapter, mut end) = adapter(ChannelConfig::default());
        let pending: Vec<_> = (0..8)
            .map(|i| adapter.post(command("echo", i)).unwrap())
            .collect();
        assert_eq!(adapter.in_flight(), 8);

        let mut requests = Vec::new();
        for _ in 0..8 {
            requests.push(end.requests.recv().await.unwrap());
        }
        for request in requests.iter().rev() {
            end.replies
                .send(Reply::completed(request.message_id, arg_of(request)))
                .unwrap();
        }

        for (i, p) in pending.into_iter().enumerate() {
            let reply = p.wait().await.unwrap();
            assert_eq!(reply.result, json!(i));
        }
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test]
    async fn correlation_ids_are_unique() {
        let (adapter, _end) = adapter(ChannelConfig::default());
        let ids: std::collections::HashSet<_> = (0..256)
            .map(|i| adapter.post(command("echo", i)).unwrap().id())
            .collect();
        assert_eq!(ids.len(), 256);
    }

    #[tokio::test]
    async fn exception_reply_becomes_truncated_remote_error() {
        let config = ChannelConfig {
            max_console_message_len: 10,
            ..Default::default()
        };
        let (adapter, mut end) = adapter(config);
        let pending = adapter.post(command("read_ccp4_map", 0)).unwrap();
        let request = end.requests.recv().await.unwrap();
        end.replies
            .send(Reply::exception(request.message_id, "x".repeat(500)))
            .unwrap();

        match pending.wait().await {
            Err(EngineError::Remote {
                command,
                diagnostic,
            }) => {
                assert_eq!(command, "read_ccp4_map");
                assert_eq!(diagnostic.len(), 10);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_reply_ids_are_ignored() {
        let (adapter, mut end) = adapter(ChannelConfig::default());
        let pending = adapter.post(command("echo", 1)).unwrap();
        let request = end.requests.recv().await.unwrap();

        end.replies
            .send(Reply::completed(Uuid::new_v4(), json!(99)))
            .unwrap();
        end.replies
            .send(Reply::completed(request.message_id, json!(1)))
            .unwrap();

        assert_eq!(pending.wait().await.unwrap().result, json!(1));
    }

    #[tokio::test]
    async fn cancel_resolves_with_cancelled() {
        let (adapter, _end) = adapter(ChannelConfig::default());
        let pending = adapter.post(command("slow", 1)).unwrap();
        assert!(adapter.cancel(pending.id()));
        assert!(!adapter.cancel(pending.id()));
        assert!(matches!(
            pending.wait().await,
            Err(EngineError::Cancelled { .. })
        ));
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_as_distinct_error() {
        let config = ChannelConfig {
            request_timeout: Some(Duration::from_millis(250)),
            ..Default::default()
        };
        let (adapter, _end) = adapter(config);
        let pending = adapter.post(command("slow", 1)).unwrap();
        assert!(matches!(
            pending.wait().await,
            Err(EngineError::Timeout { timeout_ms: 250, .. })
        ));
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_channel_for_pending_and_new_requests() {
        let (adapter, _end) = adapter(ChannelConfig::default());
        let pending = adapter.post(command("slow", 1)).unwrap();

        adapter.shutdown();

        assert!(adapter.is_closed());
        assert!(matches!(
            pending.wait().await,
            Err(EngineError::ChannelClosed { .. })
        ));
        assert!(matches!(
            adapter.post(command("late", 2)),
            Err(EngineError::ChannelClosed { .. })
        ));
    }

    #[tokio::test]
    async fn busy_count_is_observable() {
        let (adapter, mut end) = adapter(ChannelConfig::default());
        let mut busy = adapter.subscribe_in_flight();
        let pending = adapter.post(command("echo", 1)).unwrap();
        assert_eq!(*busy.borrow_and_update(), 1);

        let request = end.requests.recv().await.unwrap();
        end.replies
            .send(Reply::completed(request.message_id, json!(1)))
            .unwrap();
        pending.wait().await.unwrap();

        assert_eq!(*busy.borrow_and_update(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn busy_count_matches_in_flight_map_under_concurrent_traffic() {
        let (adapter, mut end) = adapter(ChannelConfig::default());
        let adapter = Arc::new(adapter);
        let worker = tokio::spawn(async move {
            while let Some(request) = end.requests.recv().await {
                let value = arg_of(&request);
                if end
                    .replies
                    .send(Reply::completed(request.message_id, value))
                    .is_err()
                {
                    break;
                }
            }
        });

        let callers: Vec<_> = (0..8)
            .map(|task| {
                let adapter = adapter.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        let pending = adapter.post(command("echo", task * 1000 + i)).unwrap();
                        {
                            let in_flight = adapter.shared.lock();
                            assert_eq!(*adapter.shared.active.borrow(), in_flight.len());
                        }
                        pending.wait().await.unwrap();
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.await.unwrap();
        }

        assert_eq!(adapter.in_flight(), 0);
        assert_eq!(*adapter.subscribe_in_flight().borrow(), 0);
        adapter.shutdown();
        worker.abort();
    }

    #[test]
    fn truncate_diagnostic_respects_char_boundaries() {
        assert_eq!(truncate_diagnostic("héllo", 2), "hé");
        assert_eq!(truncate_diagnostic("short", 160), "short");
        assert_eq!(truncate_diagnostic(&"a".repeat(200), 160).len(), 160);
    }
}
