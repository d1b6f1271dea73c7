use std::future::Future;

use tokio::sync::mpsc::UnboundedReceiver;

use super::DeviceEvent;
use crate::error::Result;
use crate::session::TransitionReport;
use crate::shutdown::ShutdownSignal;

/// Single processing entry point for hotplug events
pub trait EventHandler {
    fn handle(&mut self, event: DeviceEvent) -> impl Future<Output = Result<TransitionReport>>;
}

/// Why the dispatch loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    Shutdown,
    /// The listener thread went away and no more events will arrive
    ListenerClosed,
}

/// Feeds queued events to the handler strictly one at a time, in arrival order
///
/// The orchestrator's side effects (CEC traffic, process launch) are not safe
/// to run concurrently with themselves, so a new event is only taken off the
/// queue once the previous `handle` call has returned. Events that arrive in
/// the meantime wait in the (unbounded) queue.
pub struct EventDispatcher {
    rx: UnboundedReceiver<DeviceEvent>,
    shutdown: ShutdownSignal,
}

impl EventDispatcher {
    pub fn new(rx: UnboundedReceiver<DeviceEvent>, shutdown: ShutdownSignal) -> Self {
        Self { rx, shutdown }
    }

    pub async fn run<H: EventHandler>(mut self, handler: &mut H) -> DispatchEnd {
        let mut handled: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => None,
                event = self.rx.recv() => Some(event),
            };

            let event = match next {
                None => {
                    let mut discarded = 0;
                    while self.rx.try_recv().is_ok() {
                        discarded += 1;
                    }
                    if discarded > 0 {
                        info!("Discarding {} queued hotplug event(s) on shutdown", discarded);
                    }
                    info!("Dispatcher stopped after {} event(s)", handled);
                    return DispatchEnd::Shutdown;
                }
                Some(None) => {
                    warn!("Hotplug channel closed, dispatcher stopping");
                    return DispatchEnd::ListenerClosed;
                }
                Some(Some(event)) => event,
            };

            handled += 1;
            info!("Received hotplug event, starting handler");
            debug!("Event {}: {:?} for '{}'", handled, event.action, event.device);

            match handler.handle(event).await {
                Ok(report) => report.log(),
                Err(e) => error!("Error handling event: {}", e),
            }
        }
    }
}
