//! # controller
//!
//! The robot controller state machine. One control worker walks
//!
//! ```text
//! Connecting → Configuring → HandlingCommands ⇄ WaitingCommandInterval
//!                      ↘ Closing → WaitingRetry → Connecting …
//! ```
//!
//! a status worker ticks the robot and pumps its messages through the world
//! modeller, and every observable (per-kind messages, sent commands, errors,
//! rate-limited inference results, state transitions) fans out on its own
//! broadcast stream. Pending move/scan commands live in single
//! last-write-wins slots; the only path to termination is `shutdown`, which
//! issues exactly one final halt.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wheelly_world::robot::{Robot, RobotMessage};
use wheelly_world::{
    CameraEvent, Complex, ContactsMessage, MotionMessage, MoveCommand, ProxyMessage,
    RobotCommands, SupplyMessage, WorldModel, WorldModeller,
};

use crate::error::ControllerError;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Status worker tick period (ms of simulation time).
    pub interval: u64,
    /// Minimum gap between inference callbacks (ms of simulation time).
    pub reaction_interval: u64,
    /// Minimum gap between repeated move/scan commands (ms of simulation time).
    pub command_interval: u64,
    /// Pause between reconnect attempts (ms, scaled by `sim_speed`).
    pub connection_retry_interval: u64,
    /// Status-worker silence beyond this aborts the session (ms).
    pub watchdog_interval: u64,
    /// Real/simulated time ratio target.
    pub sim_speed: f64,
    /// Wheel speed bound used by command validation.
    pub max_pps: i32,
}

// ── Observables ───────────────────────────────────────────────────────────────

/// Controller state, published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Connecting,
    Configuring,
    HandlingCommands,
    WaitingCommandInterval,
    Closing,
    WaitingRetry,
    End,
}

/// A command actually issued to the robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SentCommand {
    Halt,
    Move { direction: Complex, speed: i32 },
    Scan { direction: Complex },
}

/// Result of one inference pass.
pub type InferenceEvent = (WorldModel, Option<RobotCommands>);

pub type InferenceCallback =
    Box<dyn FnMut(&WorldModel) -> anyhow::Result<Option<RobotCommands>> + Send>;

const CHANNEL_CAPACITY: usize = 256;

struct Channels {
    motion: Mutex<Option<broadcast::Sender<MotionMessage>>>,
    proxy: Mutex<Option<broadcast::Sender<ProxyMessage>>>,
    contacts: Mutex<Option<broadcast::Sender<ContactsMessage>>>,
    camera: Mutex<Option<broadcast::Sender<CameraEvent>>>,
    supply: Mutex<Option<broadcast::Sender<SupplyMessage>>>,
    errors: Mutex<Option<broadcast::Sender<ControllerError>>>,
    inference: Mutex<Option<broadcast::Sender<InferenceEvent>>>,
    commands: Mutex<Option<broadcast::Sender<SentCommand>>>,
    status: Mutex<Option<broadcast::Sender<ControllerStatus>>>,
}

impl Channels {
    fn new() -> Self {
        fn chan<T: Clone>() -> Mutex<Option<broadcast::Sender<T>>> {
            Mutex::new(Some(broadcast::channel(CHANNEL_CAPACITY).0))
        }
        Self {
            motion: chan(),
            proxy: chan(),
            contacts: chan(),
            camera: chan(),
            supply: chan(),
            errors: chan(),
            inference: chan(),
            commands: chan(),
            status: chan(),
        }
    }

    fn close_all(&self) {
        self.motion.lock().unwrap().take();
        self.proxy.lock().unwrap().take();
        self.contacts.lock().unwrap().take();
        self.camera.lock().unwrap().take();
        self.supply.lock().unwrap().take();
        self.errors.lock().unwrap().take();
        self.inference.lock().unwrap().take();
        self.commands.lock().unwrap().take();
        self.status.lock().unwrap().take();
    }
}

fn publish<T: Clone>(slot: &Mutex<Option<broadcast::Sender<T>>>, value: T) {
    if let Some(sender) = slot.lock().unwrap().as_ref() {
        let _ = sender.send(value);
    }
}

fn subscribe<T: Clone>(slot: &Mutex<Option<broadcast::Sender<T>>>) -> broadcast::Receiver<T> {
    match slot.lock().unwrap().as_ref() {
        Some(sender) => sender.subscribe(),
        // Already completed: a receiver that reports Closed immediately.
        None => broadcast::channel(1).1,
    }
}

// ── Throttling rules ──────────────────────────────────────────────────────────

/// A scan goes out when the direction changed, or periodically while holding a
/// non-zero direction.
fn should_send_scan(
    desired: &Complex,
    prev: Option<&Complex>,
    sim_time: u64,
    last_sensor_move: u64,
    command_interval: u64,
) -> bool {
    let changed = prev.map(|p| p.to_int_deg() != desired.to_int_deg()).unwrap_or(true);
    let refresh =
        desired.to_int_deg() != 0 && sim_time.saturating_sub(last_sensor_move) >= command_interval;
    changed || refresh
}

/// A move goes out when the command value changed, or when the robot reports
/// halt while a non-halt command is standing and the interval elapsed.
fn should_send_move(
    desired: &MoveCommand,
    prev: Option<&MoveCommand>,
    sim_time: u64,
    last_move_time: u64,
    command_interval: u64,
    robot_is_halt: bool,
) -> bool {
    let changed = prev.map(|p| p != desired).unwrap_or(true);
    let resend = matches!(prev, Some(MoveCommand::Move { .. }))
        && sim_time.saturating_sub(last_move_time) > command_interval
        && robot_is_halt;
    changed || resend
}

// ── Controller ────────────────────────────────────────────────────────────────

struct Inner<R: Robot> {
    cfg: ControllerConfig,
    robot: tokio::sync::Mutex<R>,
    modeller: Mutex<WorldModeller>,
    callback: Mutex<Option<InferenceCallback>>,

    pending_move: Mutex<Option<MoveCommand>>,
    pending_scan: Mutex<Option<Complex>>,
    prev_move: Mutex<Option<MoveCommand>>,
    prev_scan: Mutex<Option<Complex>>,

    ended: AtomicBool,
    configured: AtomicBool,
    failed: AtomicBool,
    last_tick_ms: AtomicU64,
    last_inference: AtomicU64,
    last_sensor_move: AtomicU64,
    last_move_time: AtomicU64,

    started: Instant,
    channels: Channels,
}

pub struct RobotController<R: Robot + 'static> {
    inner: Arc<Inner<R>>,
}

impl<R: Robot + 'static> Clone for RobotController<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Robot + 'static> RobotController<R> {
    pub fn new(robot: R, cfg: ControllerConfig, modeller: WorldModeller) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                robot: tokio::sync::Mutex::new(robot),
                modeller: Mutex::new(modeller),
                callback: Mutex::new(None),
                pending_move: Mutex::new(None),
                pending_scan: Mutex::new(None),
                prev_move: Mutex::new(None),
                prev_scan: Mutex::new(None),
                ended: AtomicBool::new(false),
                configured: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                last_tick_ms: AtomicU64::new(0),
                last_inference: AtomicU64::new(0),
                last_sensor_move: AtomicU64::new(0),
                last_move_time: AtomicU64::new(0),
                started: Instant::now(),
                channels: Channels::new(),
            }),
        }
    }

    /// Install the inference callback; its returned commands are executed.
    pub fn set_inference_callback(&self, callback: InferenceCallback) {
        *self.inner.callback.lock().unwrap() = Some(callback);
    }

    pub fn subscribe_motion(&self) -> broadcast::Receiver<MotionMessage> {
        subscribe(&self.inner.channels.motion)
    }

    pub fn subscribe_proxy(&self) -> broadcast::Receiver<ProxyMessage> {
        subscribe(&self.inner.channels.proxy)
    }

    pub fn subscribe_contacts(&self) -> broadcast::Receiver<ContactsMessage> {
        subscribe(&self.inner.channels.contacts)
    }

    pub fn subscribe_camera(&self) -> broadcast::Receiver<CameraEvent> {
        subscribe(&self.inner.channels.camera)
    }

    pub fn subscribe_supply(&self) -> broadcast::Receiver<SupplyMessage> {
        subscribe(&self.inner.channels.supply)
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ControllerError> {
        subscribe(&self.inner.channels.errors)
    }

    pub fn subscribe_inference(&self) -> broadcast::Receiver<InferenceEvent> {
        subscribe(&self.inner.channels.inference)
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<SentCommand> {
        subscribe(&self.inner.channels.commands)
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ControllerStatus> {
        subscribe(&self.inner.channels.status)
    }

    /// Validate and store commands into the pending slots (last write wins).
    /// After shutdown this is a no-op.
    pub fn execute(&self, commands: RobotCommands) -> Result<(), ControllerError> {
        let inner = &self.inner;
        if inner.ended.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(mv) = commands.move_command {
            if let MoveCommand::Move { speed, .. } = mv {
                if speed.abs() > inner.cfg.max_pps {
                    let err = ControllerError::InvalidCommand(format!(
                        "move speed {speed} out of [-{0}, {0}]",
                        inner.cfg.max_pps
                    ));
                    publish(&inner.channels.errors, err.clone());
                    return Err(err);
                }
            }
            *inner.pending_move.lock().unwrap() = Some(mv);
        }
        if let Some(direction) = commands.scan_direction {
            // Scan only sweeps the front hemisphere.
            if direction.y() < 0.0 {
                let err = ControllerError::InvalidCommand(format!(
                    "scan direction {}° outside the front hemisphere",
                    direction.to_int_deg()
                ));
                publish(&inner.channels.errors, err.clone());
                return Err(err);
            }
            *inner.pending_scan.lock().unwrap() = Some(direction);
        }
        Ok(())
    }

    /// Stop the controller: final halt, then `Closing` at the next checkpoint.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("controller: shutdown requested");
        let mut robot = inner.robot.lock().await;
        if robot.halt_command().await.is_ok() {
            publish(&inner.channels.commands, SentCommand::Halt);
        }
    }

    /// Spawn the control worker.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(run_control(inner))
    }
}

// ── Control worker ────────────────────────────────────────────────────────────

async fn run_control<R: Robot + 'static>(inner: Arc<Inner<R>>) {
    let mut state = ControllerStatus::Connecting;
    publish(&inner.channels.status, state);
    loop {
        let next = match state {
            ControllerStatus::Connecting => connecting(&inner).await,
            ControllerStatus::Configuring => configuring(&inner).await,
            ControllerStatus::HandlingCommands => handling_commands(&inner).await,
            ControllerStatus::WaitingCommandInterval => waiting_command_interval(&inner).await,
            ControllerStatus::Closing => closing(&inner).await,
            ControllerStatus::WaitingRetry => waiting_retry(&inner).await,
            ControllerStatus::End => break,
        };
        state = next;
        publish(&inner.channels.status, state);
    }
    info!("controller: ended");
    inner.channels.close_all();
}

async fn connecting<R: Robot>(inner: &Arc<Inner<R>>) -> ControllerStatus {
    if inner.ended.load(Ordering::Relaxed) {
        return ControllerStatus::End;
    }
    match inner.robot.lock().await.connect().await {
        Ok(()) => ControllerStatus::Configuring,
        Err(e) => {
            warn!("controller: connect failed: {e}");
            publish(&inner.channels.errors, ControllerError::from(e));
            ControllerStatus::WaitingRetry
        }
    }
}

async fn configuring<R: Robot + 'static>(inner: &Arc<Inner<R>>) -> ControllerStatus {
    if inner.ended.load(Ordering::Relaxed) {
        return ControllerStatus::Closing;
    }
    match inner.robot.lock().await.configure().await {
        Ok(()) => {
            inner.failed.store(false, Ordering::Relaxed);
            inner.configured.store(true, Ordering::Relaxed);
            inner
                .last_tick_ms
                .store(local_ms(inner), Ordering::Relaxed);
            tokio::spawn(run_status(inner.clone()));
            ControllerStatus::HandlingCommands
        }
        Err(e) => {
            warn!("controller: configure failed: {e}");
            publish(&inner.channels.errors, ControllerError::from(e));
            ControllerStatus::Closing
        }
    }
}

async fn handling_commands<R: Robot>(inner: &Arc<Inner<R>>) -> ControllerStatus {
    if inner.ended.load(Ordering::Relaxed) || inner.failed.load(Ordering::Relaxed) {
        return ControllerStatus::Closing;
    }
    match process_commands(inner).await {
        Ok(()) => ControllerStatus::WaitingCommandInterval,
        Err(e) => {
            publish(&inner.channels.errors, e);
            ControllerStatus::Closing
        }
    }
}

async fn process_commands<R: Robot>(inner: &Arc<Inner<R>>) -> Result<(), ControllerError> {
    let mut robot = inner.robot.lock().await;
    if inner.ended.load(Ordering::Relaxed) {
        return Ok(());
    }
    let sim_time = robot.simulation_time();
    let command_interval = inner.cfg.command_interval;

    // Scan slot: scans never coalesce with moves.
    let desired_scan = *inner.pending_scan.lock().unwrap();
    if let Some(direction) = desired_scan {
        let prev = *inner.prev_scan.lock().unwrap();
        if should_send_scan(
            &direction,
            prev.as_ref(),
            sim_time,
            inner.last_sensor_move.load(Ordering::Relaxed),
            command_interval,
        ) {
            robot
                .scan_command(direction)
                .await
                .map_err(ControllerError::from)?;
            publish(&inner.channels.commands, SentCommand::Scan { direction });
            *inner.prev_scan.lock().unwrap() = Some(direction);
            inner.last_sensor_move.store(sim_time, Ordering::Relaxed);
        }
    }

    // Move slot.
    let desired_move = *inner.pending_move.lock().unwrap();
    if let Some(command) = desired_move {
        let prev = *inner.prev_move.lock().unwrap();
        if should_send_move(
            &command,
            prev.as_ref(),
            sim_time,
            inner.last_move_time.load(Ordering::Relaxed),
            command_interval,
            robot.is_halt(),
        ) {
            match command {
                MoveCommand::Halt => {
                    robot.halt_command().await.map_err(ControllerError::from)?;
                    publish(&inner.channels.commands, SentCommand::Halt);
                }
                MoveCommand::Move { direction, speed } => {
                    robot
                        .move_command(direction, speed)
                        .await
                        .map_err(ControllerError::from)?;
                    publish(
                        &inner.channels.commands,
                        SentCommand::Move { direction, speed },
                    );
                }
            }
            *inner.prev_move.lock().unwrap() = Some(command);
            inner.last_move_time.store(sim_time, Ordering::Relaxed);
        }
    }
    Ok(())
}

async fn waiting_command_interval<R: Robot>(inner: &Arc<Inner<R>>) -> ControllerStatus {
    if inner.ended.load(Ordering::Relaxed) || inner.failed.load(Ordering::Relaxed) {
        return ControllerStatus::Closing;
    }
    let now = local_ms(inner);
    let last_tick = inner.last_tick_ms.load(Ordering::Relaxed);
    if last_tick + inner.cfg.watchdog_interval < now {
        warn!("controller: no signals from the status worker");
        publish(
            &inner.channels.errors,
            ControllerError::WatchdogUnsafe(inner.cfg.watchdog_interval),
        );
        return ControllerStatus::Closing;
    }
    tokio::time::sleep(scaled(inner.cfg.command_interval, inner.cfg.sim_speed)).await;
    ControllerStatus::HandlingCommands
}

async fn closing<R: Robot>(inner: &Arc<Inner<R>>) -> ControllerStatus {
    inner.configured.store(false, Ordering::Relaxed);
    if let Err(e) = inner.robot.lock().await.close().await {
        debug!("controller: close failed: {e}");
    }
    *inner.prev_move.lock().unwrap() = None;
    *inner.prev_scan.lock().unwrap() = None;
    if inner.ended.load(Ordering::Relaxed) {
        ControllerStatus::End
    } else {
        ControllerStatus::WaitingRetry
    }
}

async fn waiting_retry<R: Robot>(inner: &Arc<Inner<R>>) -> ControllerStatus {
    tokio::time::sleep(scaled(
        inner.cfg.connection_retry_interval,
        inner.cfg.sim_speed,
    ))
    .await;
    if inner.ended.load(Ordering::Relaxed) {
        ControllerStatus::End
    } else {
        ControllerStatus::Connecting
    }
}

// ── Status worker ─────────────────────────────────────────────────────────────

/// Ticks the robot while configured, measures real versus simulated elapsed
/// time and sleeps the difference to track the target simulation speed.
async fn run_status<R: Robot + 'static>(inner: Arc<Inner<R>>) {
    const SLEEP_SLACK_MS: u64 = 3;
    let interval = inner.cfg.interval;
    debug!("controller: status worker running every {interval} ms");
    while inner.configured.load(Ordering::Relaxed) && !inner.ended.load(Ordering::Relaxed) {
        let real_start = Instant::now();
        let messages = {
            let mut robot = inner.robot.lock().await;
            if let Err(e) = robot.tick(interval).await {
                warn!("controller: robot tick failed: {e}");
                publish(&inner.channels.errors, ControllerError::from(e));
                inner.failed.store(true, Ordering::Relaxed);
                break;
            }
            robot.poll_messages()
        };
        inner.last_tick_ms.store(local_ms(&inner), Ordering::Relaxed);

        for message in messages {
            dispatch_message(&inner, &message);
        }

        let expected = scaled(interval, inner.cfg.sim_speed);
        let real = real_start.elapsed();
        if expected > real + Duration::from_millis(SLEEP_SLACK_MS) {
            tokio::time::sleep(expected - real - Duration::from_millis(SLEEP_SLACK_MS)).await;
        }
    }
    debug!("controller: status worker exiting");
}

/// Latch every message; run the inference at most once per reaction interval.
fn dispatch_message<R: Robot + 'static>(inner: &Arc<Inner<R>>, message: &RobotMessage) {
    match message {
        RobotMessage::Motion(m) => publish(&inner.channels.motion, m.clone()),
        RobotMessage::Proxy(p) => publish(&inner.channels.proxy, p.clone()),
        RobotMessage::Contacts(c) => publish(&inner.channels.contacts, *c),
        RobotMessage::Camera(c) => publish(&inner.channels.camera, c.clone()),
        RobotMessage::Supply(s) => publish(&inner.channels.supply, *s),
    }

    let mut modeller = inner.modeller.lock().unwrap();
    modeller.latch(message);
    let sim_time = message.sim_time();

    let due = sim_time
        >= inner
            .last_inference
            .load(Ordering::Relaxed)
            .saturating_add(inner.cfg.reaction_interval);
    if !due {
        return;
    }
    inner.last_inference.store(sim_time, Ordering::Relaxed);
    let model = modeller.infer();
    drop(modeller);

    let commands = {
        let mut callback = inner.callback.lock().unwrap();
        match callback.as_mut() {
            Some(cb) => match cb(&model) {
                Ok(commands) => commands,
                Err(e) => {
                    warn!("controller: inference callback failed: {e}");
                    publish(
                        &inner.channels.errors,
                        ControllerError::UserCallback(e.to_string()),
                    );
                    None
                }
            },
            None => None,
        }
    };

    if let Some(commands) = commands {
        let controller = RobotController {
            inner: inner.clone(),
        };
        // Validation errors are already published; nothing else to do here.
        let _ = controller.execute(commands);
    }
    publish(&inner.channels.inference, (model, commands));
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn local_ms<R: Robot>(inner: &Arc<Inner<R>>) -> u64 {
    inner.started.elapsed().as_millis() as u64
}

fn scaled(ms: u64, sim_speed: f64) -> Duration {
    Duration::from_millis((ms as f64 / sim_speed.max(0.001)) as u64)
}
