use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use tokio::sync::broadcast;

use servotrack::actuator::SimulatedActuator;
use servotrack::config::{LoopConfig, ServoConfig};
use servotrack::source::{pump, spawn_pump, SweepSource};
use servotrack::{
    Actuator, ActuatorError, ActuatorKind, AngleUpdate, BoundingBox, ControlLoop, DetectionFrame, LoopError,
    LoopState, TickStatus, TrackingController,
};

/// Simulated servo that takes `delay` per command, like a servo holding for
/// its settle time.
struct SlowActuator {
    inner: SimulatedActuator,
    delay: Duration,
}

impl Actuator for SlowActuator {
    fn set_angle(&mut self, angle: f64) -> Result<(), ActuatorError> {
        thread::sleep(self.delay);
        self.inner.set_angle(angle)
    }

    fn current_angle(&self) -> f64 {
        self.inner.current_angle()
    }

    fn release(&mut self) {
        self.inner.release()
    }

    fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Simulated
    }
}

/// Simulated servo whose `panic_on`-th write panics; every other write works.
struct FaultyActuator {
    inner: SimulatedActuator,
    writes: u32,
    panic_on: u32,
}

impl Actuator for FaultyActuator {
    fn set_angle(&mut self, angle: f64) -> Result<(), ActuatorError> {
        self.writes += 1;
        if self.writes == self.panic_on {
            panic!("servo driver fault on write {}", self.writes);
        }
        self.inner.set_angle(angle)
    }

    fn current_angle(&self) -> f64 {
        self.inner.current_angle()
    }

    fn release(&mut self) {
        self.inner.release()
    }

    fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Simulated
    }
}

fn loop_config() -> LoopConfig {
    LoopConfig {
        frame_queue: 4,
        update_queue: 1024,
        command_queue: 16,
    }
}

fn drain(rx: &mut broadcast::Receiver<AngleUpdate>) -> Vec<AngleUpdate> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[test]
fn test_sweep_session_respects_bounds() {
    let servo = ServoConfig::default();
    let max_step = servo.max_speed_per_tick * servo.smoothing_factor;
    let controller = TrackingController::new(servo.clone(), Box::new(SimulatedActuator::new(90.0))).unwrap();
    let mut control = ControlLoop::new(controller, loop_config());
    let mut rx = control.subscribe();

    let frames = control.start().unwrap();
    let mut source = SweepSource::new(640, 480, 60, 15).with_gap_every(7);
    let mut updates = vec![rx.blocking_recv().unwrap()];
    let mut sent = 0;
    // Wait for each update before the next frame so nothing is dropped.
    for _ in 0..200 {
        sent += pump(&mut source, &frames, Duration::ZERO, Some(1)).unwrap();
        updates.push(rx.blocking_recv().unwrap());
    }
    assert_eq!(sent, 200);
    drop(frames);
    control.wait().unwrap();
    updates.extend(drain(&mut rx));
    assert_eq!(updates.first().unwrap().status, TickStatus::Centered);
    assert_eq!(updates.last().unwrap().status, TickStatus::Centered);

    for pair in updates.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1);
        assert!(pair[1].angle >= servo.min_angle && pair[1].angle <= servo.max_angle);
        match pair[1].status {
            TickStatus::Tracking => assert!((pair[1].angle - pair[0].angle).abs() <= max_step + 1e-9),
            TickStatus::Holding | TickStatus::NoTarget => assert_eq!(pair[1].angle, pair[0].angle),
            _ => {}
        }
    }

    let ticks = updates
        .iter()
        .filter(|u| !matches!(u.status, TickStatus::Centered | TickStatus::Manual))
        .count();
    assert_eq!(ticks, 200);
    assert!(updates.iter().any(|u| u.status == TickStatus::NoTarget));
    assert!(updates.iter().any(|u| u.status == TickStatus::Tracking));

    let controller = control.controller().unwrap();
    assert_relative_eq!(controller.current_angle(), servo.center_angle);
    assert!(controller.actuator().is_released());
    assert_eq!(control.state(), LoopState::Idle);
}

#[test]
fn test_every_tick_publishes_in_order() {
    let controller = TrackingController::new(ServoConfig::default(), Box::new(SimulatedActuator::new(90.0))).unwrap();
    let mut control = ControlLoop::new(controller, loop_config());
    let mut rx = control.subscribe();
    let frames = control.start().unwrap();
    assert_eq!(rx.blocking_recv().unwrap().status, TickStatus::Centered);

    let script = [
        (DetectionFrame::empty(640, 480), TickStatus::NoTarget),
        // Equal areas: the first box wins, far left of center.
        (
            DetectionFrame::new(640, 480, vec![BoundingBox::new(0, 0, 30, 30), BoundingBox::new(305, 10, 30, 30)]),
            TickStatus::Tracking,
        ),
        (
            DetectionFrame::new(640, 480, vec![BoundingBox::new(0, 0, 30, 30), BoundingBox::new(380, 10, 40, 40)]),
            TickStatus::Tracking,
        ),
        (
            DetectionFrame::new(0, 480, vec![BoundingBox::new(10, 10, 50, 50)]),
            TickStatus::InvalidGeometry,
        ),
        (
            DetectionFrame::new(640, 480, vec![BoundingBox::new(300, 10, 40, 40)]),
            TickStatus::Holding,
        ),
    ];

    let mut angles = Vec::new();
    for (frame, expected) in script {
        let detections = frame.detections.len();
        frames.send(frame).unwrap();
        let update = rx.blocking_recv().unwrap();
        assert_eq!(update.status, expected);
        assert_eq!(update.detections, detections);
        angles.push(update.angle);
    }

    assert_relative_eq!(angles[0], 90.0);
    assert_relative_eq!(angles[1], 90.6, epsilon = 1e-6);
    assert_relative_eq!(angles[2], 90.0, epsilon = 1e-6);
    assert_relative_eq!(angles[3], angles[2]);
    assert_relative_eq!(angles[4], angles[2]);

    control.stop().unwrap();
}

#[test]
fn test_slow_worker_keeps_latest_frames() {
    let actuator = SlowActuator {
        inner: SimulatedActuator::new(90.0),
        delay: Duration::from_millis(20),
    };
    let controller = TrackingController::new(ServoConfig::default(), Box::new(actuator)).unwrap();
    let config = LoopConfig {
        frame_queue: 2,
        ..loop_config()
    };
    let mut control = ControlLoop::new(controller, config);
    let mut rx = control.subscribe();
    let frames = control.start().unwrap();

    // The worker is still holding for its first command while all of these land.
    for i in 0..30 {
        let bbox = BoundingBox::new(600, 0, 20, (i + 1) as u32);
        frames.send(DetectionFrame::new(640, 480, vec![bbox])).unwrap();
    }
    drop(frames);
    control.wait().unwrap();

    let ticks: Vec<AngleUpdate> = drain(&mut rx)
        .into_iter()
        .filter(|u| u.status == TickStatus::Tracking)
        .collect();
    assert!(!ticks.is_empty());
    assert!(ticks.len() < 30);
    // The newest frame always survives.
    assert_eq!(ticks.last().unwrap().target.unwrap().h, 30);
}

#[test]
fn test_manual_override_from_another_thread() {
    let controller = TrackingController::new(ServoConfig::default(), Box::new(SimulatedActuator::new(90.0))).unwrap();
    let mut control = ControlLoop::new(controller, loop_config());
    let mut rx = control.subscribe();
    let frames = control.start().unwrap();
    let manual = control.manual_control().unwrap();

    let producer = spawn_pump(
        Box::new(SweepSource::new(640, 480, 60, 20)),
        frames,
        Duration::from_millis(1),
        Some(100),
    )
    .unwrap();
    let overrides = thread::spawn(move || {
        for angle in [10.0, 170.0, 45.0] {
            manual.set_absolute_angle(angle).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        manual.center().unwrap();
    });

    overrides.join().unwrap();
    producer.join().unwrap().unwrap();
    control.wait().unwrap();

    let updates = drain(&mut rx);
    let manual_angles: Vec<f64> = updates
        .iter()
        .filter(|u| u.status == TickStatus::Manual)
        .map(|u| u.angle)
        .collect();
    assert_eq!(manual_angles, vec![10.0, 170.0, 45.0, 90.0]);
    assert!(updates.windows(2).all(|w| w[1].seq == w[0].seq + 1));

    let controller = control.controller().unwrap();
    assert_relative_eq!(controller.current_angle(), 90.0);
    assert!(controller.actuator().is_released());
}

#[test]
fn test_drop_while_running_cleans_up() {
    let controller = TrackingController::new(ServoConfig::default(), Box::new(SimulatedActuator::new(90.0))).unwrap();
    let mut control = ControlLoop::new(controller, loop_config());
    let mut state = control.watch_state();
    let frames = control.start().unwrap();
    assert_eq!(*state.borrow_and_update(), LoopState::Running);

    drop(control);
    assert_eq!(*state.borrow(), LoopState::Idle);
    assert!(frames.send(DetectionFrame::empty(640, 480)).is_err());
}

#[test]
fn test_panicking_tick_still_recenters() {
    // Write 1 centers on start, write 2 is the first tracking command.
    let actuator = FaultyActuator {
        inner: SimulatedActuator::new(90.0),
        writes: 0,
        panic_on: 2,
    };
    let controller = TrackingController::new(ServoConfig::default(), Box::new(actuator)).unwrap();
    let mut control = ControlLoop::new(controller, loop_config());
    let mut rx = control.subscribe();
    let frames = control.start().unwrap();
    assert_eq!(rx.blocking_recv().unwrap().status, TickStatus::Centered);

    frames
        .send(DetectionFrame::new(640, 480, vec![BoundingBox::new(380, 100, 40, 40)]))
        .unwrap();
    let last = rx.blocking_recv().unwrap();
    assert_eq!(last.status, TickStatus::Centered);
    assert_relative_eq!(last.angle, 90.0);

    assert!(matches!(control.stop(), Err(LoopError::WorkerPanicked)));
    assert_eq!(control.state(), LoopState::Idle);
    let controller = control.controller().unwrap();
    assert_relative_eq!(controller.current_angle(), 90.0);
    assert!(controller.actuator().is_released());

    // The controller survives, so the loop can run again.
    let frames = control.start().unwrap();
    frames.send(DetectionFrame::empty(640, 480)).unwrap();
    let update = std::iter::from_fn(|| rx.blocking_recv().ok())
        .find(|u| u.status == TickStatus::NoTarget)
        .unwrap();
    assert_relative_eq!(update.angle, 90.0);
    control.stop().unwrap();
}
