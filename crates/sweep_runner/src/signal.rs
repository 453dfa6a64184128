//! Ctrl-C capture: every SIGINT becomes an `interrupt-received` event.
//!
//! The listener runs a current-thread tokio runtime on its own thread so the
//! rayon workers never need an async context.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sweep_core::events::{EventBus, LifecycleEvent};
use sweep_core::Result;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Stops listening when dropped.
pub struct InterruptListener {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl InterruptListener {
    pub fn install(bus: Arc<EventBus>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (shutdown, mut stop) = oneshot::channel::<()>();

        let handle = thread::Builder::new()
            .name("sweep-sigint".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            _ = &mut stop => break,
                            received = tokio::signal::ctrl_c() => {
                                if let Err(error) = received {
                                    warn!(%error, "cannot listen for interrupts");
                                    break;
                                }
                                warn!("interrupt received");
                                if let Err(error) = bus.publish(&LifecycleEvent::InterruptReceived) {
                                    error!(%error, "interrupt handler failed");
                                }
                            }
                        }
                    }
                });
                debug!("interrupt listener stopped");
            })?;

        debug!("interrupt listener installed");
        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }
}

impl Drop for InterruptListener {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
