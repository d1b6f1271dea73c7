// SPDX-License-Identifier: GPL-3.0-only
//! Session orchestration
//!
//! Ties controller presence to TV power and the streaming client:
//! - first controller attached (count becomes 1): wake the gaming PC, turn
//!   the TV on and switch it to this input, launch the client
//! - last controller detached (count becomes 0): put the TV in standby
//!
//! Anything in between only gets logged. The client is never stopped on the
//! detach path; whoever is playing quits it.

use crate::actuators::{Actuators, ClientHandle};
use crate::census::Census;
use crate::error::{DaemonError, Result};
use crate::hotplug::{DeviceAction, DeviceEvent, EventHandler};
use crate::power::{PowerController, PowerOnOutcome};
use crate::protocols::DisplayBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activated,
    Deactivated,
}

/// What one event did, including every step that failed along the way
#[derive(Debug, Default)]
pub struct TransitionReport {
    pub count: usize,
    pub transition: Option<Transition>,
    pub errors: Vec<DaemonError>,
}

impl TransitionReport {
    pub fn log(&self) {
        for err in &self.errors {
            error!("{}", err);
        }
        match (self.transition, self.errors.is_empty()) {
            (Some(Transition::Activated), true) => info!("Session started"),
            (Some(Transition::Deactivated), true) => info!("Session ended"),
            (Some(transition), false) => warn!(
                "{:?} with {} failed step(s)",
                transition,
                self.errors.len()
            ),
            (None, _) => debug!("No session change ({} controller(s))", self.count),
        }
    }
}

pub struct SessionOrchestrator<C, B, A> {
    census: C,
    power: PowerController<B>,
    actuators: A,
    wake_mac: String,
    state: SessionState,
    client: Option<ClientHandle>,
}

impl<C, B, A> SessionOrchestrator<C, B, A>
where
    C: Census,
    B: DisplayBus,
    A: Actuators,
{
    pub fn new(census: C, power: PowerController<B>, actuators: A, wake_mac: String) -> Self {
        Self {
            census,
            power,
            actuators,
            wake_mac,
            state: SessionState::Idle,
            client: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn power(&self) -> &PowerController<B> {
        &self.power
    }

    /// Most recently launched client, if any
    #[cfg(test)]
    pub fn client(&self) -> Option<&ClientHandle> {
        self.client.as_ref()
    }

    pub fn take_client(&mut self) -> Option<ClientHandle> {
        self.client.take()
    }

    async fn activate(&mut self, report: &mut TransitionReport) {
        self.state = SessionState::Active;
        report.transition = Some(Transition::Activated);
        info!("First controller connected, starting session");

        // The PC may still be asleep; nothing downstream depends on it
        match self.actuators.wake(&self.wake_mac) {
            Ok(()) => info!("Sent wake-on-LAN packet to {}", self.wake_mac),
            Err(e) => report.errors.push(e),
        }

        match self.power.power_on().await {
            PowerOnOutcome::PoweredOn => {
                if let Err(e) = self.power.switch_source().await {
                    report.errors.push(e);
                }
            }
            PowerOnOutcome::TimedOut => {
                report
                    .errors
                    .push(DaemonError::PowerControlTimeout(self.power.power_on_deadline()));
            }
            PowerOnOutcome::Cancelled => {}
        }

        if self.power.shutdown_requested() {
            info!("Shutting down, not launching the streaming client");
            return;
        }

        match self.actuators.launch_client() {
            Ok(client) => {
                info!("Launched {} (pid {:?})", client.command(), client.pid());
                // An older handle is dropped; its process keeps running and is still reaped
                self.client = Some(client);
            }
            Err(e) => report.errors.push(e),
        }
        debug!("TV power state: {:?}", self.power.state());
    }

    async fn deactivate(&mut self, report: &mut TransitionReport) {
        self.state = SessionState::Idle;
        report.transition = Some(Transition::Deactivated);
        info!("Last controller removed, putting TV in standby");

        if let Err(e) = self.power.standby().await {
            report.errors.push(e);
        }
        debug!("TV power state: {:?}", self.power.state());
    }
}

impl<C, B, A> EventHandler for SessionOrchestrator<C, B, A>
where
    C: Census,
    B: DisplayBus,
    A: Actuators,
{
    async fn handle(&mut self, event: DeviceEvent) -> Result<TransitionReport> {
        let count = self.census.count()?;
        debug!("Number of controllers detected: {}", count);

        let mut report = TransitionReport {
            count,
            ..Default::default()
        };

        match (event.action, count, self.state) {
            (DeviceAction::Attach, 1, SessionState::Idle) => self.activate(&mut report).await,
            (DeviceAction::Detach, 0, SessionState::Active) => self.deactivate(&mut report).await,
            (action, count, state) => {
                debug!(
                    "No transition for {:?} with {} controller(s) while {:?}",
                    action, count, state
                );
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::census::tests::FakeCensus;
    use crate::hotplug::{EventDispatcher, Listener};
    use crate::power::tests::FakeBus;
    use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::Instant;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    #[derive(Clone, Default)]
    struct RecordingActuators {
        calls: Arc<Mutex<Vec<String>>>,
        fail_wake: bool,
        fail_launch: bool,
    }

    impl RecordingActuators {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    impl Actuators for RecordingActuators {
        fn wake(&self, mac: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("wake {}", mac));
            if self.fail_wake {
                return Err(DaemonError::NetworkSend {
                    mac: mac.to_string(),
                    reason: "network unreachable".to_string(),
                });
            }
            Ok(())
        }

        fn launch_client(&self) -> Result<ClientHandle> {
            self.calls.lock().unwrap().push("launch".to_string());
            if self.fail_launch {
                return Err(DaemonError::ProcessLaunch {
                    command: "moonlight".to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Ok(ClientHandle::without_process("moonlight"))
        }
    }

    type TestOrchestrator = SessionOrchestrator<FakeCensus, FakeBus, RecordingActuators>;

    fn orchestrator(
        census: &FakeCensus,
        bus: FakeBus,
        actuators: &RecordingActuators,
        shutdown: ShutdownSignal,
    ) -> TestOrchestrator {
        SessionOrchestrator::new(
            census.clone(),
            PowerController::new(bus, shutdown),
            actuators.clone(),
            MAC.to_string(),
        )
    }

    fn event(action: DeviceAction, device: &str) -> DeviceEvent {
        DeviceEvent {
            action,
            device: device.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_attach_detach_detach_gives_one_session() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::turns_on_after(1), &actuators, coordinator.signal());

        let mut transitions = Vec::new();
        let steps = [
            (DeviceAction::Attach, "/dev/hidraw0"),
            (DeviceAction::Attach, "/dev/hidraw1"),
            (DeviceAction::Detach, "/dev/hidraw0"),
            (DeviceAction::Detach, "/dev/hidraw1"),
        ];
        for (action, device) in steps {
            match action {
                DeviceAction::Attach => census.attach(device),
                DeviceAction::Detach => census.detach(device),
            }
            let report = orch.handle(event(action, device)).await.unwrap();
            assert!(report.errors.is_empty(), "{:?}", report.errors);
            transitions.push(report.transition);
        }

        assert_eq!(
            transitions,
            vec![Some(Transition::Activated), None, None, Some(Transition::Deactivated)]
        );
        assert_eq!(orch.state(), SessionState::Idle);
        assert_eq!(actuators.calls(), vec![format!("wake {}", MAC), "launch".to_string()]);
        assert_eq!(orch.power().bus().source_calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.power().bus().standby_calls.load(Ordering::SeqCst), 1);
        // Detach path leaves the client alone
        assert!(orch.client().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_order_is_wake_power_source_launch() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::turns_on_after(2), &actuators, coordinator.signal());
        let start = Instant::now();

        census.attach("/dev/hidraw0");
        let report = orch.handle(event(DeviceAction::Attach, "/dev/hidraw0")).await.unwrap();

        assert_eq!(report.transition, Some(Transition::Activated));
        assert_eq!(
            *orch.power().bus().log.lock().unwrap(),
            vec!["power_on", "power_on", "set_active_source"]
        );
        // Two one-second polls, then the five-second settle delay
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(actuators.count("launch"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_on_timeout_skips_source_switch_but_still_launches() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::never_on(), &actuators, coordinator.signal());

        census.attach("/dev/hidraw0");
        let report = orch.handle(event(DeviceAction::Attach, "/dev/hidraw0")).await.unwrap();

        assert_eq!(report.transition, Some(Transition::Activated));
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], DaemonError::PowerControlTimeout(_)));
        assert_eq!(orch.power().bus().source_calls.load(Ordering::SeqCst), 0);
        assert_eq!(actuators.count("launch"), 1);
        assert_eq!(orch.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_and_launch_failures_are_reported_not_fatal() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators {
            fail_wake: true,
            fail_launch: true,
            ..Default::default()
        };
        let mut orch = orchestrator(&census, FakeBus::turns_on_after(1), &actuators, coordinator.signal());

        census.attach("/dev/hidraw0");
        let report = orch.handle(event(DeviceAction::Attach, "/dev/hidraw0")).await.unwrap();

        assert_eq!(report.errors.len(), 2);
        assert!(matches!(report.errors[0], DaemonError::NetworkSend { .. }));
        assert!(matches!(report.errors[1], DaemonError::ProcessLaunch { .. }));
        // Power-on still ran after the wake packet failed
        assert_eq!(orch.power().bus().power_on_calls.load(Ordering::SeqCst), 1);
        assert!(orch.client().is_none());
        assert_eq!(orch.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_while_idle_does_nothing() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::default(), &actuators, coordinator.signal());

        let report = orch.handle(event(DeviceAction::Detach, "/dev/hidraw0")).await.unwrap();

        assert_eq!(report.transition, None);
        assert_eq!(report.count, 0);
        assert!(actuators.calls().is_empty());
        assert_eq!(orch.power().bus().standby_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_with_count_above_one_does_nothing() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::default(), &actuators, coordinator.signal());

        // Two controllers were already connected when the daemon started
        census.attach("/dev/hidraw0");
        census.attach("/dev/hidraw1");
        let report = orch.handle(event(DeviceAction::Attach, "/dev/hidraw1")).await.unwrap();

        assert_eq!(report.count, 2);
        assert_eq!(report.transition, None);
        assert_eq!(orch.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attaches_during_power_on_are_queued_and_do_not_relaunch() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::turns_on_after(3), &actuators, coordinator.signal());
        let (tx, rx) = unbounded_channel();
        let dispatcher = EventDispatcher::new(rx, coordinator.signal());

        census.attach("/dev/hidraw0");
        tx.send(event(DeviceAction::Attach, "/dev/hidraw0")).unwrap();

        let driver = async {
            // Mid power-on poll
            tokio::time::sleep(Duration::from_millis(1500)).await;
            census.attach("/dev/hidraw1");
            tx.send(event(DeviceAction::Attach, "/dev/hidraw1")).unwrap();
            census.attach("/dev/hidraw2");
            tx.send(event(DeviceAction::Attach, "/dev/hidraw2")).unwrap();

            // The first sequence (3s power-on + 5s settle) is still running
            assert_eq!(actuators.count("launch"), 0);

            tokio::time::sleep(Duration::from_secs(30)).await;
            coordinator.trigger();
        };

        let (_, ()) = tokio::join!(dispatcher.run(&mut orch), driver);

        assert_eq!(actuators.count("launch"), 1);
        assert_eq!(actuators.count("wake"), 1);
        assert_eq!(orch.power().bus().power_on_calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_power_on_skips_launch() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::never_on(), &actuators, coordinator.signal());
        let start = Instant::now();

        census.attach("/dev/hidraw0");
        let (report, ()) = tokio::join!(orch.handle(event(DeviceAction::Attach, "/dev/hidraw0")), async {
            tokio::time::sleep(Duration::from_millis(4200)).await;
            coordinator.trigger();
        });

        let report = report.unwrap();
        assert_eq!(report.transition, Some(Transition::Activated));
        assert!(report.errors.is_empty());
        assert_eq!(actuators.count("launch"), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_settle_delay_skips_launch() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let bus = FakeBus::turns_on_after(1);
        let mut orch = orchestrator(&census, bus, &actuators, coordinator.signal());
        let start = Instant::now();

        census.attach("/dev/hidraw0");
        // On after 1s, so the trigger lands 2s into the 5s settle delay
        let (report, ()) = tokio::join!(orch.handle(event(DeviceAction::Attach, "/dev/hidraw0")), async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            coordinator.trigger();
        });

        let report = report.unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(orch.power().bus().source_calls.load(Ordering::SeqCst), 1);
        assert_eq!(actuators.count("launch"), 0);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    struct RecordingListener {
        stop: Arc<AtomicBool>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Listener for RecordingListener {
        fn join(self) {
            let entry = if self.stop.load(Ordering::SeqCst) {
                "listener_join"
            } else {
                "listener_join_before_stop"
            };
            self.log.lock().unwrap().push(entry);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_path_cancels_event_then_joins_listener_then_releases() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let bus = FakeBus::never_on();
        let log = bus.log.clone();
        let listener = RecordingListener {
            stop: coordinator.listener_flag(),
            log: log.clone(),
        };
        let mut orch = orchestrator(&census, bus, &actuators, coordinator.signal());
        let (tx, rx) = unbounded_channel();
        let dispatcher = EventDispatcher::new(rx, coordinator.signal());

        census.attach("/dev/hidraw0");
        tx.send(event(DeviceAction::Attach, "/dev/hidraw0")).unwrap();
        let stop = async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            coordinator.trigger();
        };
        tokio::join!(dispatcher.run(&mut orch), stop);
        coordinator.teardown(listener, &mut orch, false).await;

        // Three power-on attempts before the 3s checkpoint, no launch
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "power_on",
                "power_on",
                "power_on",
                "listener_join",
                "release",
            ]
        );
        assert_eq!(actuators.count("launch"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_idle_touches_no_actuator() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::default(), &actuators, coordinator.signal());
        let (_tx, rx) = unbounded_channel();
        let dispatcher = EventDispatcher::new(rx, coordinator.signal());

        coordinator.trigger();
        dispatcher.run(&mut orch).await;
        coordinator.release(&mut orch, false).await;

        assert!(actuators.calls().is_empty());
        assert_eq!(*orch.power().bus().log.lock().unwrap(), vec!["release"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_can_terminate_tracked_client() {
        let coordinator = ShutdownCoordinator::new();
        let census = FakeCensus::default();
        let actuators = RecordingActuators::default();
        let mut orch = orchestrator(&census, FakeBus::turns_on_after(1), &actuators, coordinator.signal());

        census.attach("/dev/hidraw0");
        orch.handle(event(DeviceAction::Attach, "/dev/hidraw0")).await.unwrap();
        assert!(orch.client().is_some());

        coordinator.release(&mut orch, true).await;

        assert!(orch.client().is_none());
        assert_eq!(orch.power().bus().release_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_census_failure_fails_only_this_event() {
        struct BrokenCensus;
        impl Census for BrokenCensus {
            fn count(&self) -> Result<usize> {
                Err(DaemonError::DeviceMonitor(std::io::Error::from(
                    std::io::ErrorKind::PermissionDenied,
                )))
            }
        }

        let coordinator = ShutdownCoordinator::new();
        let actuators = RecordingActuators::default();
        let mut orch = SessionOrchestrator::new(
            BrokenCensus,
            PowerController::new(FakeBus::default(), coordinator.signal()),
            actuators.clone(),
            MAC.to_string(),
        );

        let result = orch.handle(event(DeviceAction::Attach, "/dev/hidraw0")).await;

        assert!(matches!(result, Err(DaemonError::DeviceMonitor(_))));
        assert_eq!(orch.state(), SessionState::Idle);
        assert!(actuators.calls().is_empty());
    }
}
