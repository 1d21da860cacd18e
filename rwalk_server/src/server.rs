//! Unix-socket front end: accept loop, per-connection tasks and the
//! drain-then-exit shutdown sequence.
//!
//! Every connection gets two halves:
//! - a writer task draining the client's bounded frame queue onto the socket
//! - a reader decoding MODE and STOP commands
//!
//! Shutdown starts when STOP arrives, the caller's shutdown future resolves
//! or the engine finishes. Clients are never disconnected by the server; it
//! keeps accepting and waits until the last one leaves, then removes the
//! socket file and joins the engine.

use crate::engine::{RunSummary, WalkEngine};
use crate::error::ServerError;
use crate::hub::{Admission, Hub};
use crate::pacing::Pacer;
use crate::registry::ClientId;
use bytes::Bytes;
use futures::StreamExt;
use rwalk_wire::{encode_to_bytes, FrameCodec, Message, WireError};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

/// Largest inbound payload accepted from a client. Clients only send MODE
/// and STOP.
pub const COMMAND_MAX_PAYLOAD: usize = 4096;

/// A single socket write blocked this long drops the client.
pub const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing connection may spend flushing queued frames.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

type EngineHandle = JoinHandle<Result<RunSummary, ServerError>>;

/// Holds the engine until the first client arrives, then its thread.
struct EngineSlot<P: Pacer> {
    pending: Mutex<Option<WalkEngine<P>>>,
    running: Mutex<Option<EngineHandle>>,
}

impl<P: Pacer> EngineSlot<P> {
    fn new(engine: WalkEngine<P>) -> Self {
        Self {
            pending: Mutex::new(Some(engine)),
            running: Mutex::new(None),
        }
    }

    fn launch(&self, hub: &Hub) {
        let engine = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(engine) = engine else {
            return;
        };

        match engine.spawn() {
            Ok(handle) => {
                *self.running.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
            }
            Err(e) => {
                error!("Failed to spawn engine thread: {e}");
                hub.finish();
            }
        }
    }

    fn take_handle(&self) -> Option<EngineHandle> {
        self.running.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

pub struct Server<P: Pacer> {
    hub: Arc<Hub>,
    listener: UnixListener,
    sock_path: PathBuf,
    engine: Arc<EngineSlot<P>>,
}

impl<P: Pacer> Server<P> {
    /// Binds the listening socket, replacing a stale socket file left by a
    /// previous run. Must be called inside a tokio runtime.
    pub fn bind(
        sock_path: impl Into<PathBuf>,
        hub: Arc<Hub>,
        engine: WalkEngine<P>,
    ) -> Result<Self, ServerError> {
        let sock_path = sock_path.into();
        match std::fs::remove_file(&sock_path) {
            Ok(()) => debug!(path = %sock_path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ServerError::Bind {
                    path: sock_path,
                    source,
                })
            }
        }

        let listener = UnixListener::bind(&sock_path).map_err(|source| ServerError::Bind {
            path: sock_path.clone(),
            source,
        })?;
        info!(path = %sock_path.display(), "Listening");

        Ok(Self {
            hub,
            listener,
            sock_path,
            engine: Arc::new(EngineSlot::new(engine)),
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn sock_path(&self) -> &Path {
        &self.sock_path
    }

    /// Serves clients until shutdown completes. Returns the engine's
    /// summary, or `None` if no client ever started it.
    pub async fn run<F>(self, shutdown: F) -> Result<Option<RunSummary>, ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            hub,
            listener,
            sock_path,
            engine,
        } = self;
        tokio::pin!(shutdown);
        let mut signalled = false;

        while hub.state().is_running() {
            let notified = hub.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !hub.state().is_running() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => on_accept(accepted, &hub, &engine),
                _ = &mut shutdown, if !signalled => {
                    signalled = true;
                    info!("Termination signal received");
                    hub.request_stop();
                }
                _ = &mut notified => {}
            }
        }

        info!(active = hub.active_clients(), "Waiting for clients to disconnect");
        loop {
            let notified = hub.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if hub.active_clients() == 0 {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => on_accept(accepted, &hub, &engine),
                _ = &mut notified => {}
            }
        }

        drop(listener);
        if let Err(e) = std::fs::remove_file(&sock_path) {
            debug!("Could not remove socket file: {e}");
        }
        info!("Listener closed");

        join_engine(&engine).await
    }
}

fn on_accept<P: Pacer>(
    accepted: std::io::Result<(UnixStream, tokio::net::unix::SocketAddr)>,
    hub: &Arc<Hub>,
    engine: &Arc<EngineSlot<P>>,
) {
    match accepted {
        Ok((stream, _)) => {
            // Admitted before the next loop iteration reads the active count.
            let admission = hub.admit();
            info!(id = %admission.id, active = hub.active_clients(), "Client connected");
            if admission.start_engine {
                engine.launch(hub);
            }
            tokio::spawn(serve_connection(stream, hub.clone(), admission));
        }
        Err(e) => warn!("Accept failed: {e}"),
    }
}

async fn join_engine<P: Pacer>(
    engine: &EngineSlot<P>,
) -> Result<Option<RunSummary>, ServerError> {
    let Some(handle) = engine.take_handle() else {
        return Ok(None);
    };
    let joined = tokio::task::spawn_blocking(move || handle.join())
        .await
        .map_err(|_| ServerError::EnginePanicked)?;
    match joined {
        Ok(result) => result.map(Some),
        Err(_) => Err(ServerError::EnginePanicked),
    }
}

async fn serve_connection(stream: UnixStream, hub: Arc<Hub>, admission: Admission) {
    let id = admission.id;

    let (read_half, write_half) = stream.into_split();
    let mut writer = tokio::spawn(write_frames(id, write_half, admission.frames));
    let mut writer_done = false;
    let mut commands = FramedRead::new(read_half, FrameCodec::with_max_payload(COMMAND_MAX_PAYLOAD));

    loop {
        tokio::select! {
            frame = commands.next() => match frame {
                None => {
                    debug!(%id, "Peer closed connection");
                    break;
                }
                Some(Ok(msg)) => {
                    if let Err(reason) = handle_command(&hub, id, msg) {
                        reject(&hub, id, &reason);
                        break;
                    }
                }
                Some(Err(e)) if e.is_protocol_violation() => {
                    reject(&hub, id, &e.to_string());
                    break;
                }
                Some(Err(e)) => {
                    debug!(%id, "Read failed: {e}");
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    hub.release(id);
    if !writer_done {
        // Sender is gone, so the writer ends once the queue is flushed.
        let _ = tokio::time::timeout(FLUSH_GRACE, &mut writer).await;
    }
}

fn handle_command(hub: &Hub, id: ClientId, msg: Message) -> Result<(), String> {
    match msg {
        Message::Mode(mode) => {
            info!(%id, %mode, "Mode change requested");
            hub.publish_mode(mode);
            Ok(())
        }
        Message::Stop => {
            info!(%id, "STOP received");
            hub.request_stop();
            Ok(())
        }
        other => Err(format!(
            "Unexpected {:?} message from client",
            other.msg_type()
        )),
    }
}

/// Queues a best-effort ERROR frame for a misbehaving peer.
fn reject(hub: &Hub, id: ClientId, reason: &str) {
    warn!(%id, "Protocol violation: {reason}");
    let frame = encode_to_bytes(&Message::Error(reason.to_string()));
    hub.registry().send_to(id, frame);
}

async fn write_frames(
    id: ClientId,
    mut out: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Bytes>,
) -> Result<(), WireError> {
    while let Some(frame) = frames.recv().await {
        match tokio::time::timeout(WRITE_STALL_TIMEOUT, out.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%id, "Write failed: {e}");
                return Err(e.into());
            }
            Err(_) => {
                warn!(%id, "Client stopped reading, dropping");
                return Err(std::io::Error::from(std::io::ErrorKind::TimedOut).into());
            }
        }
    }
    let _ = out.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::{NoPacing, ThreadSleep};
    use futures::SinkExt;
    use rwalk_core::{ObstacleMap, RunConfig};
    use rwalk_wire::{SimMode, DEFAULT_MAX_PAYLOAD};
    use tokio::io::AsyncReadExt;
    use tokio_util::codec::Framed;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn hub(config: RunConfig) -> Arc<Hub> {
        let obstacles = ObstacleMap::empty(config.world_w, config.world_h);
        Arc::new(Hub::new(config, obstacles))
    }

    fn quick() -> RunConfig {
        RunConfig {
            world_w: 5,
            world_h: 5,
            replications: 1,
            max_steps: 50,
            step_delay_ms: 0,
            walk_seed: 3,
            ..Default::default()
        }
    }

    fn slow() -> RunConfig {
        RunConfig {
            world_w: 31,
            world_h: 31,
            replications: 1000,
            max_steps: 1000,
            step_delay_ms: 1,
            walk_seed: 3,
            ..Default::default()
        }
    }

    async fn connect(path: &Path) -> Framed<UnixStream, FrameCodec> {
        let stream = UnixStream::connect(path).await.unwrap();
        Framed::new(stream, FrameCodec::with_max_payload(DEFAULT_MAX_PAYLOAD))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_run_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("walk.sock");
        let results = dir.path().join("results.csv");

        let hub = hub(quick());
        let engine = WalkEngine::new(hub.clone(), NoPacing::default())
            .with_results(results.clone(), sock.display().to_string());
        let server = Server::bind(&sock, hub, engine).unwrap();
        let task = tokio::spawn(server.run(std::future::pending()));

        let mut client = connect(&sock).await;
        let first = client.next().await.unwrap().unwrap();
        assert!(matches!(first, Message::Welcome(w) if w.world_w == 5));

        let mut saw_stats = false;
        loop {
            let msg = tokio::time::timeout(TIMEOUT, client.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            match msg {
                Message::Stats(grid) => {
                    assert_eq!(grid.prob.len(), 25);
                    saw_stats = true;
                }
                Message::Mode(SimMode::Summary) => break,
                _ => {}
            }
        }
        assert!(saw_stats);
        drop(client);

        let summary = tokio::time::timeout(TIMEOUT, task)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.replications_completed, 1);
        assert!(!sock.exists());
        assert!(results.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_clients() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("walk.sock");

        let hub = hub(slow());
        let engine = WalkEngine::new(hub.clone(), ThreadSleep);
        let server = Server::bind(&sock, hub.clone(), engine).unwrap();
        let task = tokio::spawn(server.run(std::future::pending()));

        let mut watcher = connect(&sock).await;
        assert!(matches!(watcher.next().await, Some(Ok(Message::Welcome(_)))));

        let mut stopper = connect(&sock).await;
        assert!(matches!(stopper.next().await, Some(Ok(Message::Welcome(_)))));
        stopper.send(Message::Stop).await.unwrap();

        // The engine winds down, but both clients stay connected.
        tokio::time::timeout(TIMEOUT, async {
            while hub.state().phase() != crate::state::Phase::Finished {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        assert_eq!(hub.active_clients(), 2);

        drop(stopper);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        drop(watcher);
        let summary = tokio::time::timeout(TIMEOUT, task)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.replications_completed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_frame_drops_only_offender() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("walk.sock");

        let hub = hub(slow());
        let engine = WalkEngine::new(hub.clone(), ThreadSleep);
        let server = Server::bind(&sock, hub.clone(), engine).unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let mut good = connect(&sock).await;
        assert!(matches!(good.next().await, Some(Ok(Message::Welcome(_)))));

        // Raw header: STOP type with a 1 GiB declared payload.
        let mut bad = UnixStream::connect(&sock).await.unwrap();
        let mut header = Vec::new();
        header.extend_from_slice(&5u32.to_ne_bytes());
        header.extend_from_slice(&(1u32 << 30).to_ne_bytes());
        bad.write_all(&header).await.unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(TIMEOUT, bad.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        let mut frames = FramedRead::new(&received[..], FrameCodec::with_max_payload(DEFAULT_MAX_PAYLOAD));
        let mut saw_error = false;
        while let Some(Ok(msg)) = frames.next().await {
            if let Message::Error(text) = msg {
                assert!(!text.is_empty());
                saw_error = true;
            }
        }
        assert!(saw_error);

        assert!(hub.state().is_running());
        assert!(matches!(
            tokio::time::timeout(TIMEOUT, good.next()).await.unwrap(),
            Some(Ok(_))
        ));

        stop_tx.send(()).unwrap();
        drop(good);
        let summary = tokio::time::timeout(TIMEOUT, task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(summary.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mode_command_rebroadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("walk.sock");

        let hub = hub(slow());
        let engine = WalkEngine::new(hub.clone(), ThreadSleep);
        let server = Server::bind(&sock, hub.clone(), engine).unwrap();
        let task = tokio::spawn(server.run(std::future::pending()));

        let mut a = connect(&sock).await;
        let mut b = connect(&sock).await;
        let mut commander = connect(&sock).await;
        commander.send(Message::Mode(SimMode::Summary)).await.unwrap();

        for client in [&mut a, &mut b] {
            let got_mode = tokio::time::timeout(TIMEOUT, async {
                while let Some(Ok(msg)) = client.next().await {
                    if msg == Message::Mode(SimMode::Summary) {
                        return true;
                    }
                }
                false
            })
            .await
            .unwrap();
            assert!(got_mode);
        }
        assert_eq!(hub.state().mode(), SimMode::Summary);

        hub.request_stop();
        drop(a);
        drop(b);
        drop(commander);
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_clients() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("walk.sock");

        let hub = hub(quick());
        let engine = WalkEngine::new(hub.clone(), NoPacing::default());
        let server = Server::bind(&sock, hub, engine).unwrap();
        assert!(sock.exists());

        let summary = server.run(async {}).await.unwrap();
        assert!(summary.is_none());
        assert!(!sock.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_accepted_client_counted_before_handler_returns() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("walk.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let hub = hub(quick());
        let slot = Arc::new(EngineSlot::new(WalkEngine::new(hub.clone(), NoPacing::default())));

        let _client = UnixStream::connect(&sock).await.unwrap();
        on_accept(listener.accept().await, &hub, &slot);
        assert_eq!(hub.active_clients(), 1);

        let summary = tokio::time::timeout(TIMEOUT, join_engine(&slot))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.replications_completed, 1);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("walk.sock");
        std::fs::write(&sock, b"stale").unwrap();

        let hub = hub(quick());
        let engine = WalkEngine::new(hub.clone(), NoPacing::default());
        let server = Server::bind(&sock, hub, engine).unwrap();
        assert_eq!(server.sock_path(), sock.as_path());
    }
}
