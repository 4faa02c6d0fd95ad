//! `hackerneld`: the daemon half of the access-control engine.
//!
//! Parses configuration, opens the kernel channel, and runs three
//! concurrent surfaces against a single shared [`Engine`]: the kernel
//! control-plane reader, the operator socket (C7), and the heartbeat (C6).
//! `SIGINT`/`SIGTERM` trigger the same orderly shutdown the original
//! `user-space/main.cc` performs: stop the operator channel, disable
//! file/process protection, tear down the kernel channel.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use hackernel::cli::Cli;
use hackernel::config::Config;
use hackernel::engine::Engine;
use hackernel::host::{AdminCheck, HostFs, LinuxAdminCheck, LinuxHostFs};
use hackernel::perm::PermMask;
use hackernel::proto;
use hackernel::transport::{KernelChannel, NetlinkChannel};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config(&cli);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.clone()),
    )
    .format_timestamp_millis()
    .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start the tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("hackerneld exiting: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "config-file")]
fn load_config(cli: &Cli) -> Config {
    use hackernel::config::FileConfig;

    let mut config = Config::default();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("/etc/hackernel/hackerneld.toml"));
    match FileConfig::load(&config_path) {
        Ok(file_config) => file_config.apply(&mut config),
        Err(e) => warn!("ignoring config file {}: {e}", config_path.display()),
    }
    cli.apply(&mut config);
    config
}

#[cfg(not(feature = "config-file"))]
fn load_config(cli: &Cli) -> Config {
    let mut config = Config::default();
    cli.apply(&mut config);
    config
}

async fn run(config: Config) -> hackernel::error::Result<()> {
    let host: Arc<dyn HostFs> = Arc::new(LinuxHostFs);
    let admin: Arc<dyn AdminCheck> = Arc::new(LinuxAdminCheck::new(std::process::id()));
    let channel: Arc<dyn KernelChannel> = Arc::new(NetlinkChannel::open()?);

    let engine = Arc::new(Engine::new(Arc::clone(&host), admin, Arc::clone(&channel)));
    info!("engine initialized, kernel channel open");

    if let Some(policy_file) = &config.policy_file {
        if let Err(e) = reinject_policy(&engine, host.as_ref(), policy_file) {
            warn!(
                "failed to re-inject policy from {}: {e}",
                policy_file.display()
            );
        }
    }

    let (operator_shutdown_tx, operator_shutdown_rx) = tokio::sync::oneshot::channel();
    let (heartbeat_shutdown_tx, heartbeat_shutdown_rx) = tokio::sync::oneshot::channel();

    let operator_task = tokio::spawn(hackernel::operator::serve(
        config.operator_socket.clone(),
        Arc::clone(&engine),
        Arc::clone(&host),
        operator_shutdown_rx,
    ));
    let heartbeat_task = tokio::spawn(hackernel::operator::run_heartbeat(
        Arc::clone(&engine),
        heartbeat_shutdown_rx,
    ));

    let kernel_task = {
        let engine = Arc::clone(&engine);
        let host = Arc::clone(&host);
        let channel = Arc::clone(&channel);
        tokio::task::spawn_blocking(move || kernel_reader_loop(engine, host.as_ref(), channel))
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, disabling protection");

    let _ = operator_shutdown_tx.send(());
    let _ = heartbeat_shutdown_tx.send(());
    // The kernel reader is parked in a blocking `recv`; ask the transport to
    // unblock it so the reader thread can observe the channel is closing.
    channel.shutdown();

    engine.store().clear();

    if let Err(e) = operator_task.await {
        warn!("operator task join error: {e}");
    }
    if let Err(e) = heartbeat_task.await {
        warn!("heartbeat task join error: {e}");
    }
    if let Err(e) = kernel_task.await {
        warn!("kernel reader task join error: {e}");
    }

    info!("shutdown complete");
    Ok(())
}

/// Read framed messages from the kernel channel until it is shut down,
/// decoding and dispatching each one through the control plane. Decode or
/// dispatch failures are logged and the loop continues — a single malformed
/// message must not take the whole control plane down.
fn kernel_reader_loop(engine: Arc<Engine>, host: &dyn HostFs, channel: Arc<dyn KernelChannel>) {
    loop {
        let (bytes, peer_portid) = match channel.recv_with_portid() {
            Ok(framed) => framed,
            Err(e) => {
                info!("kernel channel closed, reader exiting: {e}");
                return;
            }
        };
        let msg = match proto::decode(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping malformed message from the kernel channel: {e}");
                continue;
            }
        };
        // The kernel channel is an implicitly privileged peer: the messages
        // it forwards originate from kernel-resident enforcement, not an
        // arbitrary userspace caller, so the administrator-capability check
        // on handshake is satisfied unconditionally here.
        let peer_uid = 0;
        if let Some(reply) = engine
            .session()
            .handle_inbound(&msg, peer_portid, peer_uid, host)
        {
            let wire = proto::encode(&reply);
            if let Err(e) = channel.send(&wire) {
                warn!("failed to send handshake reply: {e}");
            }
        }
    }
}

/// Apply `PATH MASK` lines from a policy file at startup, via the same
/// `set_path` path the operator socket's `set` command and the kernel's
/// `FILE SET` message both use. This is an explicit, operator-supplied
/// convenience, not automatic persistence of prior state: policy is never
/// written back out by the engine itself.
fn reinject_policy(
    engine: &Engine,
    host: &dyn HostFs,
    policy_file: &std::path::Path,
) -> hackernel::error::Result<()> {
    let text = std::fs::read_to_string(policy_file)?;
    let mut applied = 0u32;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(path), Some(mask_str)) = (parts.next(), parts.next()) else {
            warn!("policy file line {}: expected 'PATH MASK'", lineno + 1);
            continue;
        };
        let Ok(mask_bits) = mask_str.parse::<i32>() else {
            warn!("policy file line {}: MASK must be an integer", lineno + 1);
            continue;
        };
        engine
            .store()
            .set_path(host, path, PermMask::from_bits_truncate(mask_bits))?;
        applied += 1;
    }
    info!("re-injected {applied} policy entries from {}", policy_file.display());
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
