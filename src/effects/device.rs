use async_trait::async_trait;
use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::{JoinHandle, JoinSet};

/// Best-effort control surface of one lighting device.
///
/// Every call reports success as a `bool`; a `false` result is logged by the
/// dispatcher and never retried within the same tick. Implementations must
/// be shareable across tasks (`Send + Sync`) since commands for the same
/// device may be in flight concurrently.
///
/// # Usage
/// ```rust,no_run
/// # use pulselight::effects::{DeviceController, LoggingDevice};
/// # async fn example() {
/// let device = LoggingDevice::new("strip-1");
/// if !device.set_color(255, 0, 128).await {
///     eprintln!("{} rejected the color", device.name());
/// }
/// # }
/// ```
#[async_trait]
pub trait DeviceController: Send + Sync {
    fn name(&self) -> &str;

    async fn set_color(&self, r: u8, g: u8, b: u8) -> bool;

    /// `level` in [0, 1].
    async fn set_brightness(&self, level: f32) -> bool;

    async fn set_effect(&self, effect: &str) -> bool;

    async fn turn_on(&self) -> bool;

    async fn turn_off(&self) -> bool;
}

/// Device that only logs what it is asked to do. Used by the binaries when
/// no transport is configured.
pub struct LoggingDevice {
    name: String,
    commands: AtomicU64,
}

impl LoggingDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: AtomicU64::new(0),
        }
    }

    /// Total number of commands received.
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    fn count(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl DeviceController for LoggingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_color(&self, r: u8, g: u8, b: u8) -> bool {
        self.count();
        trace!("[{}] color #{:02x}{:02x}{:02x}", self.name, r, g, b);
        true
    }

    async fn set_brightness(&self, level: f32) -> bool {
        self.count();
        trace!("[{}] brightness {:.2}", self.name, level);
        true
    }

    async fn set_effect(&self, effect: &str) -> bool {
        self.count();
        debug!("[{}] effect '{}'", self.name, effect);
        true
    }

    async fn turn_on(&self) -> bool {
        self.count();
        debug!("[{}] on", self.name);
        true
    }

    async fn turn_off(&self) -> bool {
        self.count();
        debug!("[{}] off", self.name);
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAction {
    SetColor { r: u8, g: u8, b: u8 },
    SetBrightness(f32),
    SetEffect(String),
    TurnOn,
    TurnOff,
}

impl DeviceAction {
    /// Color and brightness changes: the per-tick updates a newer one
    /// makes obsolete.
    pub fn is_update(&self) -> bool {
        matches!(self, DeviceAction::SetColor { .. } | DeviceAction::SetBrightness(_))
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::SetColor { r, g, b } => write!(f, "set_color({}, {}, {})", r, g, b),
            DeviceAction::SetBrightness(level) => write!(f, "set_brightness({:.2})", level),
            DeviceAction::SetEffect(name) => write!(f, "set_effect({})", name),
            DeviceAction::TurnOn => write!(f, "turn_on"),
            DeviceAction::TurnOff => write!(f, "turn_off"),
        }
    }
}

/// One device call, addressed to the effect instance that caused it.
#[derive(Clone)]
pub struct DeviceCommand {
    pub effect_id: String,
    pub device: Arc<dyn DeviceController>,
    pub action: DeviceAction,
}

impl DeviceCommand {
    pub fn new(
        effect_id: impl Into<String>,
        device: Arc<dyn DeviceController>,
        action: DeviceAction,
    ) -> Self {
        Self {
            effect_id: effect_id.into(),
            device,
            action,
        }
    }

    /// Perform the call, logging a rejected command.
    pub async fn execute(self) -> bool {
        let ok = match &self.action {
            DeviceAction::SetColor { r, g, b } => self.device.set_color(*r, *g, *b).await,
            DeviceAction::SetBrightness(level) => self.device.set_brightness(*level).await,
            DeviceAction::SetEffect(name) => self.device.set_effect(name).await,
            DeviceAction::TurnOn => self.device.turn_on().await,
            DeviceAction::TurnOff => self.device.turn_off().await,
        };

        if !ok {
            warn!(
                "Device '{}' rejected {} for effect '{}'",
                self.device.name(),
                self.action,
                self.effect_id
            );
        }
        ok
    }
}

/// Cheap handle for queueing commands; never blocks or awaits.
#[derive(Clone)]
pub struct CommandSender {
    sender: mpsc::UnboundedSender<DeviceCommand>,
}

impl CommandSender {
    /// A sender plus the raw receiving end, for consumers other than
    /// [`CommandDispatcher`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeviceCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Returns `false` once the dispatcher has shut down.
    pub fn send(&self, command: DeviceCommand) -> bool {
        self.sender.send(command).is_ok()
    }

    pub fn send_all(&self, commands: impl IntoIterator<Item = DeviceCommand>) -> usize {
        commands
            .into_iter()
            .map(|c| self.send(c))
            .filter(|&sent| sent)
            .count()
    }
}

/// Identity of a device handle: two commands go to the same lane exactly
/// when they share the same `Arc`.
fn device_key(device: &Arc<dyn DeviceController>) -> usize {
    Arc::as_ptr(device) as *const () as usize
}

/// Commands waiting for one device, performed one at a time in order.
///
/// At most one color and one brightness update are pending: a newer update
/// replaces the older one, and a `TurnOff` discards both.
struct DeviceLane {
    pending: Mutex<VecDeque<DeviceCommand>>,
    wake: Notify,
    closed: AtomicBool,
}

impl DeviceLane {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeviceCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `command`, returning how many pending commands it superseded.
    fn push(&self, command: DeviceCommand) -> usize {
        let superseded = {
            let mut pending = self.lock();
            let before = pending.len();
            match &command.action {
                DeviceAction::TurnOff => pending.retain(|c| !c.action.is_update()),
                action if action.is_update() => {
                    let kind = mem::discriminant(action);
                    pending.retain(|c| mem::discriminant(&c.action) != kind);
                }
                _ => {}
            }
            let superseded = before - pending.len();
            pending.push_back(command);
            superseded
        };
        self.wake.notify_one();
        superseded
    }

    /// Let the worker exit once everything pending has run.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    async fn run(self: Arc<Self>) -> u64 {
        let mut executed = 0;
        loop {
            let next = self.lock().pop_front();
            match next {
                Some(command) => {
                    command.execute().await;
                    executed += 1;
                }
                None if self.closed.load(Ordering::Acquire) => break,
                None => self.wake.notified().await,
            }
        }
        executed
    }
}

/// Routes queued device commands to one worker task per device.
///
/// Calls to the same device never overlap and complete in the order they
/// were queued, so a `TurnOff` is always the last thing a stopped effect's
/// device sees. A slow device only holds up its own lane.
pub struct CommandDispatcher {
    sender: CommandSender,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<u64>>,
}

impl CommandDispatcher {
    /// Must be called from inside a tokio runtime.
    pub fn spawn() -> Self {
        let (sender, receiver) = CommandSender::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        Self {
            sender,
            shutdown: Some(shutdown_tx),
            task: Some(tokio::spawn(Self::run(receiver, shutdown_rx))),
        }
    }

    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    async fn run(
        mut receiver: mpsc::UnboundedReceiver<DeviceCommand>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> u64 {
        let mut lanes: HashMap<usize, Arc<DeviceLane>> = HashMap::new();
        let mut workers = JoinSet::new();
        let mut received = 0u64;
        let mut superseded = 0usize;
        let mut closing = false;

        loop {
            tokio::select! {
                _ = &mut shutdown, if !closing => {
                    // stop accepting, but still run what was already queued
                    receiver.close();
                    closing = true;
                }
                command = receiver.recv() => match command {
                    Some(command) => {
                        received += 1;
                        let lane = lanes.entry(device_key(&command.device)).or_insert_with(|| {
                            let lane = Arc::new(DeviceLane::new());
                            workers.spawn(Arc::clone(&lane).run());
                            lane
                        });
                        superseded += lane.push(command);
                    }
                    None => break,
                },
            }
        }

        for lane in lanes.values() {
            lane.close();
        }
        let mut executed = 0u64;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(count) => executed += count,
                Err(e) => warn!("Device worker failed: {}", e),
            }
        }

        debug!(
            "Command dispatcher finished: {} received, {} superseded, {} executed on {} device(s)",
            received,
            superseded,
            executed,
            lanes.len()
        );
        executed
    }

    /// Stop accepting commands and wait up to `timeout` for queued and
    /// in-flight calls to finish. Returns `false` if the deadline passed and
    /// the remaining calls were abandoned.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(mut task) = self.task.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Device commands still running after {:?}, abandoning them", timeout);
                task.abort();
                false
            }
        }
    }
}

impl Drop for CommandDispatcher {
    /// Close the queue without waiting; commands already queued still run
    /// in the background for as long as the runtime does.
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
