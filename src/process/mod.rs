pub mod fifo;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::config::ProcessConfig;

/// Consecutive respawn attempts before giving up on a helper
const MAX_RESPAWNS: u32 = 5;

/// How command responses and events are framed to a helper
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Encoder {
    Text,
    Json,
}

impl FromStr for Encoder {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Encoder::Text),
            "json" => Ok(Encoder::Json),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unknown encoder '{}'", other),
            )),
        }
    }
}

/// Event classes a helper can subscribe to
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum Subscription {
    NeighborChanges,
    ReceiveRoutes,
    ReceivePackets,
    SendPackets,
}

impl FromStr for Subscription {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neighbor-changes" => Ok(Subscription::NeighborChanges),
            "receive-routes" => Ok(Subscription::ReceiveRoutes),
            "receive-packets" => Ok(Subscription::ReceivePackets),
            "send-packets" => Ok(Subscription::SendPackets),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unknown subscription '{}'", other),
            )),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Subscription::NeighborChanges => "neighbor-changes",
            Subscription::ReceiveRoutes => "receive-routes",
            Subscription::ReceivePackets => "receive-packets",
            Subscription::SendPackets => "send-packets",
        };
        write!(f, "{}", word)
    }
}

/// Acknowledgement discipline, settable per service at runtime
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AckMode {
    /// `done` / `error` after every command (the default)
    Enabled,
    /// Errors only
    Disabled,
    /// Nothing at all
    Silenced,
}

#[derive(Debug)]
enum ServiceWriter {
    Child(ChildStdin),
    Fifo {
        path: PathBuf,
        sender: Option<pipe::Sender>,
    },
}

impl ServiceWriter {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            ServiceWriter::Child(stdin) => {
                stdin.write_all(line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            ServiceWriter::Fifo { path, sender } => {
                // The CLI may not be attached; (re)open lazily
                if sender.is_none() {
                    *sender = pipe::OpenOptions::new().open_sender(&*path).ok();
                }
                let pipe = match sender {
                    Some(pipe) => pipe,
                    None => return Ok(()), // nobody listening
                };
                let mut buf = Vec::with_capacity(line.len() + 1);
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
                if let Err(err) = pipe.write_all(&buf).await {
                    *sender = None;
                    return Err(err);
                }
                Ok(())
            }
        }
    }
}

struct Service {
    config: Arc<ProcessConfig>,
    child: Option<Child>,
    writer: Option<ServiceWriter>,
    encoder: Encoder,
    sync_mode: bool,
    ack_mode: AckMode,
    broken: bool,
    respawns: u32,
}

impl Service {
    fn subscribed(&self, subscription: Subscription) -> bool {
        self.config.subscriptions.contains(&subscription)
    }
}

type LineStream = BoxStream<'static, (String, String)>;

/// Owns the helper processes and the FIFO CLI: spawning, line pumping
/// in both directions, acknowledgement framing, and the
/// respawn/terminate lifecycle.
pub struct ProcessManager {
    services: HashMap<String, Service>,
    readers: SelectAll<LineStream>,
    /// Keeps our own CLI `.in` pipe open so EOF never fires between
    /// CLI invocations
    fifo_keepalive: Option<pipe::Sender>,
    terminate_requested: bool,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        ProcessManager {
            services: HashMap::new(),
            readers: SelectAll::new(),
            fifo_keepalive: None,
            terminate_requested: false,
        }
    }

    /// A helper with `terminate` set has been lost for good
    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested
    }

    pub fn start(&mut self, configs: &[Arc<ProcessConfig>], restart_running: bool) {
        for config in configs {
            let running = self
                .services
                .get(&config.name)
                .map(|s| !s.broken)
                .unwrap_or(false);
            if running && !restart_running {
                continue;
            }
            if let Err(err) = self.spawn(Arc::clone(config)) {
                error!("Could not start process {}: {}", config.name, err);
            }
        }
    }

    fn spawn(&mut self, config: Arc<ProcessConfig>) -> io::Result<()> {
        let mut words = config.run.split_whitespace();
        let program = words.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Empty run command for {}", config.name),
            )
        })?;
        let mut child = Command::new(program)
            .args(words)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "Child stdin not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "Child stdout not captured")
        })?;

        let name = config.name.clone();
        let lines = FramedRead::new(stdout, LinesCodec::new())
            .filter_map(move |result| {
                let name = name.clone();
                async move {
                    match result {
                        Ok(line) => Some((name, line.trim_end().to_string())),
                        Err(_) => None,
                    }
                }
            })
            .boxed();
        self.readers.push(lines);

        info!("Started process {} ({})", config.name, config.run);
        let respawns = self
            .services
            .get(&config.name)
            .map(|s| s.respawns)
            .unwrap_or(0);
        self.services.insert(
            config.name.clone(),
            Service {
                encoder: config.encoder,
                config,
                child: Some(child),
                writer: Some(ServiceWriter::Child(stdin)),
                sync_mode: false,
                ack_mode: AckMode::Enabled,
                broken: false,
                respawns,
            },
        );
        Ok(())
    }

    /// Register the FIFO CLI as a pseudo-service
    pub fn register_cli(
        &mut self,
        receiver: pipe::Receiver,
        out_path: PathBuf,
        keepalive: pipe::Sender,
    ) {
        let lines = FramedRead::new(receiver, LinesCodec::new())
            .filter_map(move |result| async move {
                match result {
                    Ok(line) => Some(("cli".to_string(), line.trim_end().to_string())),
                    Err(_) => None,
                }
            })
            .boxed();
        self.readers.push(lines);
        self.fifo_keepalive = Some(keepalive);
        self.services.insert(
            "cli".to_string(),
            Service {
                config: Arc::new(ProcessConfig {
                    name: "cli".to_string(),
                    run: String::new(),
                    encoder: Encoder::Text,
                    respawn: false,
                    terminate: false,
                    subscriptions: vec![],
                }),
                child: None,
                writer: Some(ServiceWriter::Fifo {
                    path: out_path,
                    sender: None,
                }),
                encoder: Encoder::Text,
                sync_mode: false,
                ack_mode: AckMode::Enabled,
                broken: false,
                respawns: 0,
            },
        );
        info!("FIFO CLI attached");
    }

    /// The next command line from any helper (FIFO order per service)
    pub async fn next_line(&mut self) -> (String, String) {
        loop {
            if self.readers.is_empty() {
                futures::future::pending::<()>().await;
            }
            match self.readers.next().await {
                Some(line) => return line,
                // a stream ended (child died / CLI detached); reap it
                None => {
                    self.reap();
                    continue;
                }
            }
        }
    }

    /// Check for exited children and apply the respawn/terminate policy
    pub fn reap(&mut self) {
        let mut to_respawn: Vec<Arc<ProcessConfig>> = Vec::new();
        for service in self.services.values_mut() {
            let exited = match service.child.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                None => false,
            };
            if !exited || service.broken {
                continue;
            }
            warn!("Process {} exited", service.config.name);
            service.broken = true;
            service.writer = None;
            service.child = None;
            if service.config.respawn && service.respawns < MAX_RESPAWNS {
                service.respawns += 1;
                to_respawn.push(Arc::clone(&service.config));
            } else if service.config.terminate {
                error!(
                    "Process {} lost for good, shutting down",
                    service.config.name
                );
                self.terminate_requested = true;
            }
        }
        for config in to_respawn {
            debug!("Respawning {}", config.name);
            if let Err(err) = self.spawn(config) {
                error!("Respawn failed: {}", err);
            }
        }
    }

    pub fn encoder(&self, service: &str) -> Encoder {
        self.services
            .get(service)
            .map(|s| s.encoder)
            .unwrap_or(Encoder::Json)
    }

    pub fn set_encoder(&mut self, service: &str, encoder: Encoder) {
        if let Some(s) = self.services.get_mut(service) {
            s.encoder = encoder;
        }
    }

    pub fn sync_mode(&self, service: &str) -> bool {
        self.services
            .get(service)
            .map(|s| s.sync_mode)
            .unwrap_or(false)
    }

    pub fn set_sync_mode(&mut self, service: &str, sync: bool) {
        if let Some(s) = self.services.get_mut(service) {
            s.sync_mode = sync;
        }
    }

    pub fn set_ack_mode(&mut self, service: &str, mode: AckMode) {
        if let Some(s) = self.services.get_mut(service) {
            s.ack_mode = mode;
        }
    }

    /// Write one line to a helper; a failed write marks it broken and
    /// triggers the lifecycle policy
    pub async fn write(&mut self, service: &str, line: &str) {
        let failed = match self.services.get_mut(service) {
            Some(entry) => match entry.writer.as_mut() {
                Some(writer) => writer.write_line(line).await.is_err(),
                None => false,
            },
            None => false,
        };
        if failed {
            warn!("Write to {} failed", service);
            if let Some(entry) = self.services.get_mut(service) {
                if let Some(ServiceWriter::Child(_)) = entry.writer {
                    entry.broken = true;
                }
            }
            self.reap();
        }
    }

    pub async fn answer_done(&mut self, service: &str) {
        let mode = self
            .services
            .get(service)
            .map(|s| s.ack_mode)
            .unwrap_or(AckMode::Enabled);
        if mode == AckMode::Enabled {
            self.write(service, "done").await;
        }
    }

    pub async fn answer_error(&mut self, service: &str, reason: Option<&str>) {
        let (mode, encoder) = match self.services.get(service) {
            Some(s) => (s.ack_mode, s.encoder),
            None => (AckMode::Enabled, Encoder::Json),
        };
        if mode == AckMode::Silenced {
            return;
        }
        if let Some(reason) = reason {
            let line = match encoder {
                Encoder::Json => {
                    serde_json::json!({ "error": reason }).to_string()
                }
                Encoder::Text => format!("error: {}", reason),
            };
            self.write(service, &line).await;
        }
        self.write(service, "error").await;
    }

    /// Fan an event out to every service subscribed to `subscription`.
    /// The callback renders the line for the service's encoder.
    pub async fn broadcast<F>(&mut self, subscription: Subscription, render: F)
    where
        F: Fn(Encoder) -> String,
    {
        let targets: Vec<(String, Encoder)> = self
            .services
            .iter()
            .filter(|(_, s)| !s.broken && s.subscribed(subscription))
            .map(|(name, s)| (name.clone(), s.encoder))
            .collect();
        for (name, encoder) in targets {
            let line = render(encoder);
            self.write(&name, &line).await;
        }
    }

    /// Two-phase shutdown: tell everyone, then kill what remains
    pub async fn shutdown(&mut self) {
        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            self.write(&name, "shutdown").await;
        }
        for service in self.services.values_mut() {
            if let Some(child) = service.child.as_mut() {
                let _ = child.start_kill();
            }
        }
        self.services.clear();
        self.fifo_keepalive = None;
    }
}
