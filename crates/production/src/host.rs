//! The host frame loop the node binary runs.

use framelock_node::{ClusterDriver, FatalError, StateKind};
use framelock_transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, trace};

/// Pacing and limits for [`run_host_loop`].
#[derive(Debug, Clone)]
pub struct HostLoopConfig {
    /// Time budget of one frame.
    pub frame_interval: Duration,
    /// Sleep between `do_frame` calls while the barrier is closed.
    pub poll_interval: Duration,
    /// Request a cluster shutdown after this many frames.
    pub max_frames: Option<u64>,
    /// Log the driver status every this many frames.
    pub report_every: u64,
}

impl Default for HostLoopConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs(1) / 60,
            poll_interval: Duration::from_millis(1),
            max_frames: None,
            report_every: 600,
        }
    }
}

/// Drive `driver` until the node shuts down or fails.
///
/// Each frame ticks `do_frame` until the barrier opens, sleeps out the rest
/// of the frame budget in place of rendering, then ends the frame. Setting
/// `shutdown` asks the whole cluster to stop. Returns the number of frames
/// completed.
pub fn run_host_loop<T: Transport>(
    driver: &mut ClusterDriver<T>,
    config: &HostLoopConfig,
    shutdown: &AtomicBool,
) -> Result<u64, FatalError> {
    let mut shutdown_sent = false;
    let mut frames = 0;

    loop {
        let frame_start = Instant::now();
        let mut new_frame = true;

        loop {
            let limit_reached = config.max_frames.is_some_and(|max| frames >= max);
            if !shutdown_sent && (shutdown.load(Ordering::Acquire) || limit_reached) {
                info!(frames, "Requesting cluster shutdown");
                driver.broadcast_shutdown_request();
                shutdown_sent = true;
            }

            if !driver.do_frame(new_frame)? {
                info!(frames, stats = %driver.frame_stats(), "Host loop finished");
                return Ok(frames);
            }
            new_frame = false;
            // Once shutdown is requested, only tick until the node has drained.
            if !shutdown_sent
                && driver.ready_to_proceed()
                && driver.state_kind() == StateKind::Synchronized
            {
                break;
            }
            thread::sleep(config.poll_interval);
        }

        let elapsed = frame_start.elapsed();
        if elapsed < config.frame_interval {
            thread::sleep(config.frame_interval - elapsed);
        }
        driver.end_frame();
        frames += 1;

        if config.report_every > 0 && frames % config.report_every == 0 {
            info!(status = %driver.debug_string(), "Frame report");
        } else {
            trace!(frame = driver.current_frame_id(), "Frame done");
        }
    }
}
