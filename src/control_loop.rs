//! The tracking worker.
//!
//! One dedicated thread owns the [`TrackingController`] while the loop runs.
//! Detection frames arrive on a bounded broadcast channel (drop-oldest when
//! the worker falls behind), manual commands on a bounded mpsc queue, and
//! angle updates leave on a second broadcast channel in tick order. Nothing
//! else touches the controller until the worker hands it back.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tokio::runtime::Builder;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::controller::{Steering, TrackingController};
use crate::detection::{BoundingBox, DetectionFrame};
use crate::error::LoopError;
use crate::selector::select_target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    /// A new angle was computed and sent to the actuator.
    Tracking,
    /// Target inside the dead zone.
    Holding,
    NoTarget,
    /// Frame width was not positive; tick skipped.
    InvalidGeometry,
    /// A manual override was applied.
    Manual,
    /// Servo returned to center on start or shutdown.
    Centered,
}

/// Published to observers after every tick and every manual command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AngleUpdate {
    /// Increases by one per update, across sessions.
    pub seq: u64,
    pub angle: f64,
    pub status: TickStatus,
    pub target: Option<BoundingBox>,
    /// Boxes the detector reported for this tick.
    pub detections: usize,
}

#[derive(Debug, Clone, Copy)]
enum Command {
    SetAngle(f64),
    Center,
}

/// Producer side of a running loop.
///
/// Sending never blocks. When every clone is dropped the worker winds down on
/// its own, the same way [`ControlLoop::stop`] would.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: broadcast::Sender<DetectionFrame>,
}

impl FrameSender {
    pub fn send(&self, frame: DetectionFrame) -> Result<(), LoopError> {
        self.tx.send(frame).map(|_| ()).map_err(|_| LoopError::WorkerGone)
    }
}

/// Manual override handle for a running loop; cloneable across threads.
#[derive(Debug, Clone)]
pub struct ManualControl {
    tx: mpsc::Sender<Command>,
}

impl ManualControl {
    pub fn set_absolute_angle(&self, angle: f64) -> Result<(), LoopError> {
        self.send(Command::SetAngle(angle))
    }

    pub fn center(&self) -> Result<(), LoopError> {
        self.send(Command::Center)
    }

    fn send(&self, command: Command) -> Result<(), LoopError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LoopError::CommandQueueFull,
            mpsc::error::TrySendError::Closed(_) => LoopError::NotRunning,
        })
    }
}

/// Controller plus the update counter; moves between the loop and its worker.
struct Session {
    controller: TrackingController,
    seq: u64,
}

impl Session {
    fn update(&mut self, status: TickStatus, target: Option<BoundingBox>, detections: usize) -> AngleUpdate {
        self.seq += 1;
        AngleUpdate {
            seq: self.seq,
            angle: self.controller.current_angle(),
            status,
            target,
            detections,
        }
    }
}

pub struct ControlLoop {
    config: LoopConfig,
    session: Option<Session>,
    /// Yields the session back, and whether the worker ran to completion.
    worker: Option<JoinHandle<(Session, bool)>>,
    commands: Option<mpsc::Sender<Command>>,
    state: Arc<watch::Sender<LoopState>>,
    updates: broadcast::Sender<AngleUpdate>,
}

impl ControlLoop {
    pub fn new(controller: TrackingController, config: LoopConfig) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        let (updates, _) = broadcast::channel(config.update_queue.max(1));
        Self {
            config,
            session: Some(Session { controller, seq: 0 }),
            worker: None,
            commands: None,
            state: Arc::new(state),
            updates,
        }
    }

    /// Angle updates from now on. A receiver that falls more than
    /// `update_queue` updates behind skips the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<AngleUpdate> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// The controller, while no worker holds it.
    pub fn controller(&self) -> Option<&TrackingController> {
        self.session.as_ref().map(|s| &s.controller)
    }

    /// Spawn the worker and return the handle frames are pushed through.
    pub fn start(&mut self) -> Result<FrameSender, LoopError> {
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return Err(LoopError::AlreadyRunning);
        }
        self.reap()?;

        let runtime = Builder::new_current_thread().build()?;
        let Some(mut session) = self.session.take() else {
            return Err(LoopError::ControllerLost);
        };
        let (frame_tx, frame_rx) = broadcast::channel(self.config.frame_queue.max(1));
        let (command_tx, command_rx) = mpsc::channel(self.config.command_queue.max(1));
        let updates = self.updates.clone();
        let state = Arc::clone(&self.state);

        self.state.send_replace(LoopState::Running);
        let state_rx = self.state.subscribe();

        let spawned = thread::Builder::new()
            .name("servotrack-control".into())
            .spawn(move || {
                // The drop guard has already recentered by the time a panic
                // lands here, so the session is safe to hand back.
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut worker = Worker {
                        session: &mut session,
                        updates,
                        state,
                    };
                    runtime.block_on(worker.run(frame_rx, command_rx, state_rx));
                }));
                (session, outcome.is_ok())
            });

        match spawned {
            Ok(handle) => {
                info!("Control loop started");
                self.worker = Some(handle);
                self.commands = Some(command_tx);
                Ok(FrameSender { tx: frame_tx })
            }
            Err(e) => {
                self.state.send_replace(LoopState::Idle);
                Err(LoopError::Spawn(e))
            }
        }
    }

    /// Ask the worker to finish after its current tick and wait for it.
    ///
    /// The worker recenters and releases the actuator before it exits. Stopping
    /// an idle loop is a no-op. A worker that panicked is reported once as
    /// [`LoopError::WorkerPanicked`]; the controller is still returned and the
    /// loop can be started again.
    pub fn stop(&mut self) -> Result<(), LoopError> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.state.send_if_modified(|state| {
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
                true
            } else {
                false
            }
        });
        self.reap()
    }

    /// Block until the worker exits on its own, i.e. every [`FrameSender`] was dropped.
    pub fn wait(&mut self) -> Result<(), LoopError> {
        self.reap()
    }

    /// A cloneable override handle, available while the loop runs.
    pub fn manual_control(&self) -> Result<ManualControl, LoopError> {
        match &self.commands {
            Some(tx) if self.is_running() => Ok(ManualControl { tx: tx.clone() }),
            _ => Err(LoopError::NotRunning),
        }
    }

    /// Manual override. Queued behind the worker while running, applied
    /// directly when idle.
    pub fn set_absolute_angle(&mut self, angle: f64) -> Result<(), LoopError> {
        self.dispatch(Command::SetAngle(angle))
    }

    pub fn center(&mut self) -> Result<(), LoopError> {
        self.dispatch(Command::Center)
    }

    fn dispatch(&mut self, command: Command) -> Result<(), LoopError> {
        if let Ok(control) = self.manual_control() {
            return control.send(command);
        }
        // A worker that ended on its own still holds the controller until joined.
        self.reap()?;

        let session = self.session.as_mut().ok_or(LoopError::ControllerLost)?;
        let result = match command {
            Command::SetAngle(angle) => session.controller.set_absolute_angle(angle),
            Command::Center => session.controller.center(),
        };
        let update = session.update(TickStatus::Manual, None, 0);
        let _ = self.updates.send(update);
        result.map(|_| ()).map_err(LoopError::from)
    }

    fn reap(&mut self) -> Result<(), LoopError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.commands = None;
        let joined = handle.join();
        self.state.send_replace(LoopState::Idle);
        match joined {
            Ok((session, true)) => {
                self.session = Some(session);
                Ok(())
            }
            Ok((session, false)) => {
                self.session = Some(session);
                Err(LoopError::WorkerPanicked)
            }
            // Nothing outside the guarded block panics.
            Err(_) => Err(LoopError::WorkerPanicked),
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Control loop did not shut down cleanly: {}", e);
        }
    }
}

/// Worker-side view of a session. Dropping it recenters and releases the
/// actuator, so cleanup also runs when a tick panics.
struct Worker<'a> {
    session: &'a mut Session,
    updates: broadcast::Sender<AngleUpdate>,
    state: Arc<watch::Sender<LoopState>>,
}

impl Worker<'_> {
    async fn run(
        &mut self,
        mut frames: broadcast::Receiver<DetectionFrame>,
        mut commands: mpsc::Receiver<Command>,
        mut state: watch::Receiver<LoopState>,
    ) {
        if let Err(e) = self.session.controller.center() {
            warn!("Failed to center servo on start: {}", e);
        }
        self.publish(TickStatus::Centered, None, 0);

        loop {
            if *state.borrow_and_update() != LoopState::Running {
                info!("Stop requested");
                break;
            }

            tokio::select! {
                biased;

                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(command) = commands.recv() => self.apply(command),
                frame = frames.recv() => match frame {
                    Ok(frame) => self.tick(frame),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Control loop fell behind, dropped {} oldest frames", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Frame source closed");
                        break;
                    }
                },
            }
        }
    }

    fn tick(&mut self, frame: DetectionFrame) {
        let target = select_target(&frame.detections);
        let status = match target {
            None => TickStatus::NoTarget,
            Some(bbox) => match self
                .session
                .controller
                .track(bbox.center_x() as f64, frame.width)
            {
                Ok(Steering::Move(_)) => TickStatus::Tracking,
                Ok(Steering::Hold(_)) => TickStatus::Holding,
                Err(e) => {
                    warn!("Skipping tick: {}", e);
                    TickStatus::InvalidGeometry
                }
            },
        };
        self.publish(status, target, frame.detections.len());
    }

    fn apply(&mut self, command: Command) {
        let controller = &mut self.session.controller;
        let result = match command {
            Command::SetAngle(angle) => controller.set_absolute_angle(angle),
            Command::Center => controller.center(),
        };
        if let Err(e) = result {
            warn!("Manual servo command failed: {}", e);
        }
        self.publish(TickStatus::Manual, None, 0);
    }

    fn publish(&mut self, status: TickStatus, target: Option<BoundingBox>, detections: usize) {
        let update = self.session.update(status, target, detections);
        debug!("#{} {:?} angle={:.2}°", update.seq, update.status, update.angle);
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        self.session.controller.shutdown();
        self.publish(TickStatus::Centered, None, 0);
        self.state.send_replace(LoopState::Idle);
        info!("Control loop stopped");
    }
}
