use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use dsr_transport::Transport;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, Interval, MissedTickBehavior},
};
use tracing::{debug, info, trace};

use crate::Router;

/// Resolution of route discovery retries and deferred replies.
const ROUTE_REQUEST_RESOLUTION: Duration = Duration::from_millis(100);

/// The periodic timers of a router.
#[derive(Debug)]
struct Timers {
    blacklist: Interval,
    route_requests: Interval,
    rreq_cleanup: Interval,
    maintenance: Interval,
    send_buffer: Interval,
    link_cache: Interval,
}

impl Timers {
    fn new<T: Transport>(router: &Router<T>) -> Self {
        let config = router.config().load();
        Self {
            blacklist: interval(config.blacklist.cleanup_interval),
            route_requests: interval(ROUTE_REQUEST_RESOLUTION),
            rreq_cleanup: interval(config.rreq_table.cleanup_interval),
            maintenance: interval(config.retransmission_timeout),
            send_buffer: interval(config.sendbuffer_cleanup_interval),
            link_cache: interval(config.link_cache_sweep_interval),
        }
    }
}

fn interval(period: Duration) -> Interval {
    let mut interval = time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Runs the periodic work of a [`Router`]: blacklist expiry, route discovery retries, request
/// table cleanup, retransmissions, send buffer expiry and link cache garbage collection.
///
/// Timer periods are read from the configuration when the driver is created.
#[derive(Debug)]
pub struct Driver<T> {
    router: Arc<Router<T>>,
    timers: Timers,
    shutdown: oneshot::Receiver<()>,
}

impl<T: Transport> Driver<T> {
    /// Creates a driver for `router`, along with the sender that stops it.
    pub fn new(router: Arc<Router<T>>) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let timers = Timers::new(&router);
        (Self { router, timers, shutdown: rx }, tx)
    }

    /// Spawns a driver for `router` on the current tokio runtime.
    pub fn spawn(router: Arc<Router<T>>) -> DriverHandle {
        let (driver, shutdown) = Self::new(router);
        DriverHandle { shutdown: Some(shutdown), task: tokio::spawn(driver) }
    }
}

impl<T: Transport> Future for Driver<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // A dropped sender stops the driver too.
        if Pin::new(&mut this.shutdown).poll(cx).is_ready() {
            info!(local = %this.router.local(), "driver shutting down");
            return Poll::Ready(());
        }

        loop {
            let router = &this.router;
            let timers = &mut this.timers;

            if timers.maintenance.poll_tick(cx).is_ready() {
                router.sweep_maintenance(Instant::now());
                continue;
            }

            if timers.route_requests.poll_tick(cx).is_ready() {
                router.run_route_requests(Instant::now());
                continue;
            }

            if timers.send_buffer.poll_tick(cx).is_ready() {
                router.sweep_send_buffer(Instant::now());
                continue;
            }

            if timers.blacklist.poll_tick(cx).is_ready() {
                let sweep = router.sweep_blacklist(Instant::now());
                trace!(?sweep, "swept blacklist");
                continue;
            }

            if timers.rreq_cleanup.poll_tick(cx).is_ready() {
                router.cleanup_route_requests(Instant::now());
                continue;
            }

            if timers.link_cache.poll_tick(cx).is_ready() {
                let collected = router.sweep_link_cache();
                if collected > 0 {
                    debug!(collected, "collected link cache nodes");
                }
                continue;
            }

            return Poll::Pending;
        }
    }
}

/// Handle to a spawned [`Driver`].
#[derive(Debug)]
pub struct DriverHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Stops the driver and waits for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }

    /// Returns true if the driver task finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
