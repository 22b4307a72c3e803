//! # driver
//!
//! Line-oriented TCP client for the real robot: one socket for the
//! microcontroller, an optional second one for the camera. Reader tasks feed
//! every inbound line into a single queue and bump the activity clock; a
//! watchdog task flags the robot unsafe when the wire goes silent.
//!
//! `configure` runs the clock sync (`ck`) and then plays the configured setup
//! commands, each of which must echo back as `// <cmd>` in time. `tick`
//! drains the queue, converts remote timestamps through the clock converter
//! and hands the parsed messages to the controller. Malformed lines are
//! logged and dropped, never fatal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use wheelly_world::robot::{Robot, RobotError, RobotMessage};
use wheelly_world::{Complex, RobotSpec};

use crate::clock::{ClockConverter, ClockSyncEvent};
use crate::wire::{self, WireMessage};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub robot_addr: String,
    pub camera_addr: Option<String>,
    /// Socket connect/read guard (ms).
    pub read_timeout: u64,
    /// Clock sync and per-command echo deadline (ms).
    pub configure_timeout: u64,
    /// Watchdog poll period (ms).
    pub watchdog_interval: u64,
    /// Silence beyond this flags the robot unsafe (ms).
    pub watchdog_timeout: u64,
    /// Setup commands, echoed back on success.
    pub config_commands: Vec<String>,
}

// ── Real robot ────────────────────────────────────────────────────────────────

pub struct RealRobot {
    spec: RobotSpec,
    cfg: DriverConfig,
    started: Instant,

    writer: Option<OwnedWriteHalf>,
    lines_rx: Option<mpsc::UnboundedReceiver<String>>,
    tasks: Vec<JoinHandle<()>>,

    last_activity: Arc<AtomicU64>,
    watchdog_unsafe: Arc<AtomicBool>,

    clock: ClockConverter,
    connected: bool,
    configured: bool,
    sim_time: u64,
    halt: bool,
    queue: Vec<RobotMessage>,
}

impl RealRobot {
    pub fn new(spec: RobotSpec, cfg: DriverConfig) -> Self {
        Self {
            spec,
            cfg,
            started: Instant::now(),
            writer: None,
            lines_rx: None,
            tasks: Vec::new(),
            last_activity: Arc::new(AtomicU64::new(0)),
            watchdog_unsafe: Arc::new(AtomicBool::new(false)),
            clock: ClockConverter::identity(),
            connected: false,
            configured: false,
            sim_time: 0,
            halt: true,
            queue: Vec::new(),
        }
    }

    pub fn clock(&self) -> &ClockConverter {
        &self.clock
    }

    fn local_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    async fn send_line(&mut self, line: &str) -> Result<(), RobotError> {
        let writer = self.writer.as_mut().ok_or(RobotError::NotConnected)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        debug!("driver > {line}");
        Ok(())
    }

    fn spawn_reader(&mut self, read_half: OwnedReadHalf, tx: mpsc::UnboundedSender<String>) {
        let last_activity = self.last_activity.clone();
        let started = self.started;
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        last_activity.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("driver: reader failed: {e}");
                        break;
                    }
                }
            }
        });
        self.tasks.push(task);
    }

    fn spawn_watchdog(&mut self) {
        let last_activity = self.last_activity.clone();
        let unsafe_flag = self.watchdog_unsafe.clone();
        let started = self.started;
        let interval_ms = self.cfg.watchdog_interval;
        let timeout_ms = self.cfg.watchdog_timeout;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            loop {
                ticker.tick().await;
                let now = started.elapsed().as_millis() as u64;
                let last = last_activity.load(Ordering::Relaxed);
                if now.saturating_sub(last) >= timeout_ms {
                    warn!("driver: watchdog fired after {} ms of silence", now - last);
                    unsafe_flag.store(true, Ordering::Relaxed);
                }
            }
        });
        self.tasks.push(task);
    }

    /// Wait for a specific inbound line (clock reply or config echo) within
    /// `deadline_ms`; every other parseable robot message is dropped here
    /// since configuration precedes dispatch.
    async fn await_line<T, F: Fn(&WireMessage) -> Option<T>>(
        &mut self,
        deadline_ms: u64,
        matcher: F,
    ) -> Result<Option<T>, RobotError> {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        let rx = self.lines_rx.as_mut().ok_or(RobotError::NotConnected)?;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match timeout(deadline - now, rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(RobotError::Closed),
                Ok(Some(line)) => match wire::parse_line(&line) {
                    Ok(msg) => {
                        if let Some(found) = matcher(&msg) {
                            return Ok(Some(found));
                        }
                        debug!("driver: dropping pre-configuration message {msg:?}");
                    }
                    Err(e) => debug!("driver: unparseable line {line:?}: {e}"),
                },
            }
        }
    }

    fn convert_message(&mut self, msg: WireMessage) {
        let message = match msg {
            WireMessage::Motion(mut m) => {
                m.sim_time = self.clock.from_remote(m.sim_time);
                self.halt = m.halt;
                RobotMessage::Motion(m)
            }
            WireMessage::Proxy(mut p) => {
                p.sim_time = self.clock.from_remote(p.sim_time);
                RobotMessage::Proxy(p)
            }
            WireMessage::Contacts(mut c) => {
                c.sim_time = self.clock.from_remote(c.sim_time);
                RobotMessage::Contacts(c)
            }
            WireMessage::Camera(mut c) => {
                c.sim_time = self.clock.from_remote(c.sim_time);
                RobotMessage::Camera(c)
            }
            WireMessage::Supply(mut s) => {
                s.sim_time = self.clock.from_remote(s.sim_time);
                RobotMessage::Supply(s)
            }
            WireMessage::ClockReply(_) | WireMessage::ConfigEcho(_) => {
                debug!("driver: stray handshake line after configuration");
                return;
            }
        };
        self.sim_time = self.sim_time.max(message.sim_time());
        self.queue.push(message);
    }
}

impl Robot for RealRobot {
    async fn connect(&mut self) -> Result<(), RobotError> {
        let connect_guard = Duration::from_millis(self.cfg.read_timeout.max(1));
        let stream = timeout(connect_guard, TcpStream::connect(&self.cfg.robot_addr))
            .await
            .map_err(|_| {
                RobotError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })??;
        info!("driver: connected to {}", self.cfg.robot_addr);
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::unbounded_channel();
        self.writer = Some(write_half);
        self.lines_rx = Some(rx);
        self.last_activity
            .store(self.local_ms(), Ordering::Relaxed);
        self.watchdog_unsafe.store(false, Ordering::Relaxed);
        self.spawn_reader(read_half, tx.clone());

        if let Some(camera_addr) = self.cfg.camera_addr.clone() {
            let camera = timeout(connect_guard, TcpStream::connect(&camera_addr))
                .await
                .map_err(|_| {
                    RobotError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "camera connect timed out",
                    ))
                })??;
            info!("driver: camera channel at {camera_addr}");
            let (camera_read, _camera_write) = camera.into_split();
            self.spawn_reader(camera_read, tx);
        }

        self.spawn_watchdog();
        self.connected = true;
        Ok(())
    }

    async fn configure(&mut self) -> Result<(), RobotError> {
        if !self.connected {
            return Err(RobotError::NotConnected);
        }

        // Clock sync.
        let t0 = self.local_ms();
        self.send_line(&wire::format_clock_sync(t0)).await?;
        let reply = self
            .await_line(self.cfg.configure_timeout, |msg| match msg {
                WireMessage::ClockReply(r) if r.originate == t0 => Some(*r),
                _ => None,
            })
            .await?
            .ok_or(RobotError::SyncTimeout)?;
        let destination = self.local_ms();
        let event = ClockSyncEvent::from_reply(&reply, destination);
        self.clock = ClockConverter::from_event(&event);
        info!(
            "driver: clock synced, offset {} ms, round trip {} ms",
            event.offset(),
            event.round_trip()
        );

        // Configuration commands, each acknowledged by its echo.
        for cmd in self.cfg.config_commands.clone() {
            self.send_line(&cmd).await?;
            let acked = self
                .await_line(self.cfg.configure_timeout, |msg| match msg {
                    WireMessage::ConfigEcho(echo) if *echo == cmd => Some(()),
                    _ => None,
                })
                .await?;
            if acked.is_none() {
                warn!("driver: no echo for {cmd:?}");
                return Err(RobotError::ConfigTimeout(cmd));
            }
        }

        self.configured = true;
        info!("driver: configured ({} commands)", self.cfg.config_commands.len());
        Ok(())
    }

    async fn tick(&mut self, _dt: u64) -> Result<(), RobotError> {
        if !self.connected {
            return Err(RobotError::NotConnected);
        }
        if !self.configured {
            return Err(RobotError::NotConfigured);
        }
        if self.watchdog_unsafe.load(Ordering::Relaxed) {
            return Err(RobotError::WatchdogUnsafe(self.cfg.watchdog_timeout));
        }
        loop {
            let rx = self.lines_rx.as_mut().ok_or(RobotError::NotConnected)?;
            match rx.try_recv() {
                Ok(line) => match wire::parse_line(&line) {
                    Ok(msg) => self.convert_message(msg),
                    Err(e) => debug!("driver: dropped line {line:?}: {e}"),
                },
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(RobotError::Closed);
                }
            }
        }
        Ok(())
    }

    fn poll_messages(&mut self) -> Vec<RobotMessage> {
        std::mem::take(&mut self.queue)
    }

    async fn halt_command(&mut self) -> Result<(), RobotError> {
        self.send_line(&wire::format_halt()).await
    }

    async fn move_command(&mut self, direction: Complex, speed: i32) -> Result<(), RobotError> {
        self.send_line(&wire::format_move(&direction, speed)).await
    }

    async fn scan_command(&mut self, direction: Complex) -> Result<(), RobotError> {
        self.send_line(&wire::format_scan(&direction)).await
    }

    fn is_halt(&self) -> bool {
        self.halt
    }

    fn simulation_time(&self) -> u64 {
        self.sim_time
    }

    fn spec(&self) -> &RobotSpec {
        &self.spec
    }

    async fn close(&mut self) -> Result<(), RobotError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.writer = None;
        self.lines_rx = None;
        self.connected = false;
        self.configured = false;
        info!("driver: closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use wheelly_world::Point;

    fn spec() -> RobotSpec {
        RobotSpec {
            max_radar_distance: 3.0,
            contact_radius: 0.2,
            receptive_angle: 15f64.to_radians(),
            head_location: Point::zero(),
            camera_azimuth: Complex::zero(),
            lidar_azimuth: Complex::zero(),
            max_pps: 60,
            distance_per_pulse: 0.005,
        }
    }

    fn config(addr: String, commands: Vec<String>) -> DriverConfig {
        DriverConfig {
            robot_addr: addr,
            camera_addr: None,
            read_timeout: 2_000,
            configure_timeout: 2_000,
            watchdog_interval: 50,
            watchdog_timeout: 60_000,
            config_commands: commands,
        }
    }

    /// Mock microcontroller: answers the clock sync with the given remote
    /// offset and echoes every other line back as `// <line>`.
    async fn mock_robot(offset: i64) -> (String, JoinHandle<tokio::net::TcpStream>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            loop {
                let mut byte = [0u8; 1];
                if socket.read_exact(&mut byte).await.is_err() {
                    break;
                }
                if byte[0] != b'\n' {
                    buf.push(byte[0]);
                    continue;
                }
                let line = String::from_utf8_lossy(&buf).to_string();
                buf.clear();
                let reply = if let Some(t0) = line.strip_prefix("ck ") {
                    let t0: i64 = t0.trim().parse().unwrap();
                    let recv = t0 + offset;
                    format!("ck {} {} {}\n", t0, recv, recv + 1)
                } else {
                    format!("// {line}\n")
                };
                if socket.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
                if line == "stop" {
                    break;
                }
            }
            socket
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn clock_sync_and_config_handshake() {
        let (addr, server) = mock_robot(500_000).await;
        let mut robot = RealRobot::new(
            spec(),
            config(addr, vec!["cs 500".to_string(), "cc 30 2000".to_string()]),
        );
        robot.connect().await.unwrap();
        robot.configure().await.unwrap();

        // The mock's remote clock runs 500 s ahead: the converter maps its
        // receive stamp back onto local time.
        let remote_now = robot.clock().to_remote(robot.local_ms());
        let local = robot.clock().from_remote(remote_now);
        assert!((local as i64 - robot.local_ms() as i64).abs() < 100);

        robot.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn inbound_messages_convert_to_local_time() {
        // Mock that answers the sync with a +1000 s clock, then streams one
        // motion line and one malformed line in the remote domain.
        let offset: i64 = 1_000_000;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(t0) = line.strip_prefix("ck ") {
                    let t0: i64 = t0.trim().parse().unwrap();
                    let recv = t0 + offset;
                    let sync = format!("ck {} {} {}\n", t0, recv, recv + 1);
                    write_half.write_all(sync.as_bytes()).await.unwrap();
                    let motion =
                        format!("mt {} 10 20 90 0 0 0 1 0 0 0 0 0 0\n", recv + 5);
                    write_half.write_all(motion.as_bytes()).await.unwrap();
                    write_half.write_all(b"mt garbage\n").await.unwrap();
                }
            }
        });

        let mut robot = RealRobot::new(spec(), config(addr, vec![]));
        robot.connect().await.unwrap();
        robot.configure().await.unwrap();

        // Let the streamed lines arrive, then drain.
        tokio::time::sleep(Duration::from_millis(100)).await;
        robot.tick(100).await.unwrap();
        let messages = robot.poll_messages();
        let motion = messages
            .iter()
            .find_map(|m| match m {
                RobotMessage::Motion(m) => Some(m),
                _ => None,
            })
            .expect("motion delivered");
        // Remote stamp mapped back near local time despite the huge offset.
        assert!((motion.sim_time as i64 - robot.local_ms() as i64).abs() < 500);
        assert!(motion.halt);
        assert_eq!(motion.direction.to_int_deg(), 90);
        // The malformed line was dropped without failing the tick.
        assert_eq!(messages.len(), 1);

        robot.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn sync_timeout_without_reply() {
        // A listener that accepts and stays silent.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let mut cfg = config(addr, vec![]);
        cfg.configure_timeout = 100;
        let mut robot = RealRobot::new(spec(), cfg);
        robot.connect().await.unwrap();
        assert!(matches!(
            robot.configure().await,
            Err(RobotError::SyncTimeout)
        ));
        robot.close().await.unwrap();
        silent.abort();
    }

    #[tokio::test]
    async fn watchdog_flags_silent_wire() {
        let (addr, server) = mock_robot(0).await;
        let mut cfg = config(addr, vec![]);
        cfg.watchdog_interval = 20;
        cfg.watchdog_timeout = 80;
        let mut robot = RealRobot::new(spec(), cfg);
        robot.connect().await.unwrap();
        robot.configure().await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(matches!(
            robot.tick(100).await,
            Err(RobotError::WatchdogUnsafe(_))
        ));
        robot.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn tick_before_configure_fails() {
        let (addr, server) = mock_robot(0).await;
        let mut robot = RealRobot::new(spec(), config(addr, vec![]));
        robot.connect().await.unwrap();
        assert!(matches!(
            robot.tick(100).await,
            Err(RobotError::NotConfigured)
        ));
        robot.close().await.unwrap();
        server.abort();
    }
}
