//! Duplex message channel between a supervisor and a worker.
//!
//! A [`Duplex`] is an outbound sender plus an inbound receiver of decoded
//! messages. It is backed either by an in-process channel pair (tests, the
//! in-process launcher) or by JSON lines over a pair of byte streams (the
//! child process's stdin/stdout).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{SupervisorMessage, WorkerMessage};
use crate::ProtocolViolation;

pub type Inbound<T> = Result<T, ProtocolViolation>;

/// One end of a bidirectional message channel.
pub struct Duplex<Out, In> {
    pub tx: mpsc::UnboundedSender<Out>,
    pub rx: mpsc::UnboundedReceiver<Inbound<In>>,
}

pub type SupervisorSide = Duplex<SupervisorMessage, WorkerMessage>;
pub type WorkerSide = Duplex<WorkerMessage, SupervisorMessage>;

impl<Out, In> Duplex<Out, In> {
    pub fn send(&self, msg: Out) -> Result<(), ProtocolViolation> {
        self.tx.send(msg).map_err(|_| ProtocolViolation::ChannelClosed)
    }

    /// `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Inbound<In>> {
        self.rx.recv().await
    }
}

/// Connected in-process pair: `(supervisor side, worker side)`.
pub fn pair() -> (SupervisorSide, WorkerSide) {
    let (to_worker, from_supervisor) = mpsc::unbounded_channel::<SupervisorMessage>();
    let (to_supervisor, from_worker) = mpsc::unbounded_channel::<WorkerMessage>();
    (
        Duplex { tx: to_worker, rx: forward_ok(from_worker) },
        Duplex { tx: to_supervisor, rx: forward_ok(from_supervisor) },
    )
}

fn forward_ok<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
) -> mpsc::UnboundedReceiver<Inbound<T>> {
    let (tx, out) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if tx.send(Ok(msg)).is_err() {
                break;
            }
        }
    });
    out
}

/// Decode one line of the wire format.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Inbound<T> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    serde_json::from_value(value).map_err(|e| match kind {
        Some(kind) if e.to_string().contains("unknown variant") => {
            ProtocolViolation::UnknownMessageType(kind)
        }
        _ => ProtocolViolation::Malformed(e.to_string()),
    })
}

/// Run a JSON-lines channel over `reader`/`writer`.
///
/// The returned task owns the writer; it finishes (after flushing) once
/// every clone of `tx` has been dropped. Await it before exiting so queued
/// messages reach the peer.
pub fn json_lines<Out, In, R, W>(reader: R, writer: W) -> (Duplex<Out, In>, JoinHandle<()>)
where
    Out: Serialize + Send + 'static,
    In: DeserializeOwned + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Out>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound<In>>();

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if in_tx.send(decode_line(&line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("channel read failed: {e}");
                    break;
                }
            }
        }
        debug!("channel reader finished");
    });

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(msg) = out_rx.recv().await {
            let mut line = match serde_json::to_string(&msg) {
                Ok(line) => line,
                Err(e) => {
                    warn!("dropping unserialisable message: {e}");
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                warn!("channel write failed: {e}");
                break;
            }
            if let Err(e) = writer.flush().await {
                warn!("channel flush failed: {e}");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    (Duplex { tx: out_tx, rx: in_rx }, writer_task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::ExecutionMode;
    use serde_json::json;

    #[test]
    fn decode_classifies_failures() {
        assert!(matches!(
            decode_line::<WorkerMessage>("{not json"),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert_eq!(
            decode_line::<WorkerMessage>(r#"{"type":"selfDestruct"}"#),
            Err(ProtocolViolation::UnknownMessageType("selfDestruct".into()))
        );
        assert_eq!(decode_line::<WorkerMessage>(r#"{"type":"start"}"#), Ok(WorkerMessage::Start));
    }

    #[tokio::test]
    async fn json_lines_carry_messages_both_ways() {
        let (sup_io, worker_io) = tokio::io::duplex(4096);
        let (sup_r, sup_w) = tokio::io::split(sup_io);
        let (wrk_r, wrk_w) = tokio::io::split(worker_io);

        let (mut supervisor, _sw) =
            json_lines::<SupervisorMessage, WorkerMessage, _, _>(sup_r, sup_w);
        let (mut worker, writer) = json_lines::<WorkerMessage, SupervisorMessage, _, _>(wrk_r, wrk_w);

        supervisor.send(SupervisorMessage::StopExecution).unwrap();
        assert_eq!(worker.recv().await, Some(Ok(SupervisorMessage::StopExecution)));

        let result = engine::ExecutionResult::new(ExecutionMode::Cli, chrono::Utc::now());
        worker.send(WorkerMessage::SendMessageToUi { payload: json!({ "n": 1 }) }).unwrap();
        worker.send(WorkerMessage::End { result: result.clone() }).unwrap();
        drop(worker);
        writer.await.unwrap();

        assert_eq!(
            supervisor.recv().await,
            Some(Ok(WorkerMessage::SendMessageToUi { payload: json!({ "n": 1 }) }))
        );
        assert_eq!(supervisor.recv().await, Some(Ok(WorkerMessage::End { result })));
        assert_eq!(supervisor.recv().await, None);
    }

    #[tokio::test]
    async fn in_process_pair_closes_when_peer_drops() {
        let (mut supervisor, worker) = pair();
        worker.send(WorkerMessage::Start).unwrap();
        drop(worker);
        assert_eq!(supervisor.recv().await, Some(Ok(WorkerMessage::Start)));
        assert_eq!(supervisor.recv().await, None);
    }
}
