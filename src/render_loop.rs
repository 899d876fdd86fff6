//! Cooperative capture → filter → sample → draw loop.
//!
//! Everything runs on the calling thread. The only suspension point is the
//! scheduler's wait for the next display refresh; a stop request is observed
//! at the top of every tick and again before the next refresh is requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::capture::{CaptureProvider, FrameSource};
use crate::config::ConfigProvider;
use crate::error::{PipelineError, Result};
use crate::frame::{FrameMetadata, GridDimensions};
use crate::palette::GlyphTableCache;
use crate::sampler;
use crate::sink::RenderSink;

pub const DEFAULT_REFRESH_HZ: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Active,
}

/// Loop-owned run state: whether frames are being produced and when the last
/// one was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    phase: LoopPhase,
    last_frame_timestamp: Option<Instant>,
}

impl RunState {
    pub fn idle() -> Self {
        Self {
            phase: LoopPhase::Idle,
            last_frame_timestamp: None,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == LoopPhase::Active
    }

    pub fn last_frame_timestamp(&self) -> Option<Instant> {
        self.last_frame_timestamp
    }

    /// Frame-rate cap. Returns true and records `now` when enough time has
    /// passed since the previous frame; the first frame always passes.
    ///
    /// `slack` absorbs refresh timestamps landing a little early, so a 30 fps
    /// target on a 60 Hz refresh renders on every second refresh. Callers
    /// pass half the refresh period.
    pub fn admit_frame(&mut self, now: Instant, interval: Duration, slack: Duration) -> bool {
        if let Some(last) = self.last_frame_timestamp {
            if now.saturating_duration_since(last) + slack < interval {
                return false;
            }
        }
        self.last_frame_timestamp = Some(now);
        true
    }

    fn activate(&mut self) {
        self.phase = LoopPhase::Active;
        self.last_frame_timestamp = None;
    }

    fn deactivate(&mut self) {
        self.phase = LoopPhase::Idle;
        self.last_frame_timestamp = None;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Shareable stop request. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Routes SIGINT and SIGTERM into this handle.
    pub fn register_signals(&self) -> std::io::Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.requested))?;
        }
        Ok(())
    }
}

/// Host refresh source: blocks until the next refresh and reports its
/// scheduled time.
pub trait RefreshScheduler {
    fn next_refresh(&mut self) -> Instant;

    /// Called with the configured frame interval after every tick. Sources
    /// that can refresh faster should do so when the interval is shorter
    /// than their period.
    fn follow_frame_interval(&mut self, _interval: Duration) {}
}

/// Sleep-based stand-in for a display's vertical refresh. Runs at its base
/// rate, or faster when the frame interval asks for it.
#[derive(Debug, Clone)]
pub struct DisplayRefresh {
    base_period: Duration,
    period: Duration,
    next: Option<Instant>,
}

impl DisplayRefresh {
    pub fn new(hz: f64) -> Self {
        let hz = if hz.is_finite() && hz > 0.0 {
            hz
        } else {
            DEFAULT_REFRESH_HZ
        };
        let period = Duration::from_secs_f64(1.0 / hz);
        Self {
            base_period: period,
            period,
            next: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for DisplayRefresh {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_HZ)
    }
}

impl RefreshScheduler for DisplayRefresh {
    /// Reports the scheduled refresh time, not the wake-up time, so sleep
    /// overshoot never reaches the frame-rate cap.
    fn next_refresh(&mut self) -> Instant {
        let now = Instant::now();
        let target = match self.next {
            Some(target) if target > now => {
                thread::sleep(target - now);
                target
            }
            // Late: a slow tick delays the schedule instead of queueing
            // catch-up refreshes.
            _ => now,
        };
        self.next = Some(target + self.period);
        target
    }

    fn follow_frame_interval(&mut self, interval: Duration) {
        let period = if interval.is_zero() {
            self.base_period
        } else {
            self.base_period.min(interval)
        };
        if period != self.period {
            debug!("refresh period {:?} -> {:?}", self.period, period);
            self.period = period;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Inside the frame interval; nothing was captured.
    Skipped,
    Rendered,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLimits {
    pub max_frames: Option<u64>,
    pub max_duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub stream_ended: bool,
}

pub struct RenderLoop<C, P, S>
where
    C: CaptureProvider,
    P: ConfigProvider,
    S: RenderSink,
{
    capture: C,
    config: P,
    sink: S,
    source: Option<C::Source>,
    state: RunState,
    stop: StopHandle,
    tables: GlyphTableCache,
    limits: RunLimits,
    dims: Option<GridDimensions>,
    first_tick: Option<Instant>,
    last_tick: Option<Instant>,
    frame_interval: Option<Duration>,
    ticks: u64,
    frames_rendered: u64,
    frames_skipped: u64,
    stream_ended: bool,
}

impl<C, P, S> RenderLoop<C, P, S>
where
    C: CaptureProvider,
    P: ConfigProvider,
    S: RenderSink,
{
    pub fn new(capture: C, config: P, sink: S) -> Self {
        Self {
            capture,
            config,
            sink,
            source: None,
            state: RunState::idle(),
            stop: StopHandle::new(),
            tables: GlyphTableCache::new(),
            limits: RunLimits::default(),
            dims: None,
            first_tick: None,
            last_tick: None,
            frame_interval: None,
            ticks: 0,
            frames_rendered: 0,
            frames_skipped: 0,
            stream_ended: false,
        }
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    /// Idle → Active. Acquisition failures leave the loop Idle with nothing
    /// held and are returned as-is.
    pub fn start(&mut self) -> Result<()> {
        if self.state.is_active() {
            debug!("start ignored: loop already active");
            return Ok(());
        }
        let source = self.capture.acquire()?;
        info!("capturing from {}", source.describe());
        self.source = Some(source);
        self.stop.reset();
        self.state.activate();
        self.dims = None;
        self.first_tick = None;
        self.last_tick = None;
        self.frame_interval = None;
        self.ticks = 0;
        self.frames_rendered = 0;
        self.frames_skipped = 0;
        self.stream_ended = false;
        Ok(())
    }

    /// Active → Idle. Releases the device and drops any per-frame state.
    pub fn stop(&mut self) {
        if !self.state.is_active() {
            return;
        }
        if let Some(source) = self.source.take() {
            self.capture.release(source);
        }
        if let Err(error) = self.sink.clear() {
            warn!("failed to clear sink on stop: {error}");
        }
        self.state.deactivate();
        self.dims = None;
        info!(
            "stopped after {} frame(s) over {} tick(s)",
            self.frames_rendered, self.ticks
        );
    }

    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome> {
        if self.stop.is_requested() {
            self.stop();
        }
        if !self.state.is_active() {
            return Ok(TickOutcome::Stopped);
        }
        if self.frame_limit_reached() {
            debug!("frame limit reached before rendering");
            self.stop();
            return Ok(TickOutcome::Stopped);
        }
        self.ticks += 1;
        let first_tick = *self.first_tick.get_or_insert(now);
        // Half the observed refresh period.
        let slack = self
            .last_tick
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last) / 2);
        self.last_tick = Some(now);

        let config = self.config.snapshot();
        self.frame_interval = Some(config.frame_interval);
        if !self.state.admit_frame(now, config.frame_interval, slack) {
            self.frames_skipped += 1;
            return Ok(TickOutcome::Skipped);
        }

        let metadata = FrameMetadata {
            frame_index: self.frames_rendered,
            timestamp_ms: now.saturating_duration_since(first_tick).as_millis() as u64,
        };
        match self.render_frame(&config, metadata) {
            Ok(()) => {
                self.frames_rendered += 1;
                self.enforce_limits(now, first_tick);
                Ok(TickOutcome::Rendered)
            }
            Err(PipelineError::StreamEnded { device }) => {
                info!("capture stream from {device} ended");
                self.stream_ended = true;
                self.stop();
                Ok(TickOutcome::Stopped)
            }
            Err(error) => {
                self.stop();
                Err(error)
            }
        }
    }

    /// Starts the loop and ticks on every refresh until stopped.
    pub fn run<R: RefreshScheduler>(&mut self, scheduler: &mut R) -> Result<LoopSummary> {
        self.start()?;
        loop {
            let now = scheduler.next_refresh();
            if self.tick(now)? == TickOutcome::Stopped {
                break;
            }
            if self.stop.is_requested() {
                self.stop();
                break;
            }
            if let Some(interval) = self.frame_interval {
                scheduler.follow_frame_interval(interval);
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> LoopSummary {
        LoopSummary {
            ticks: self.ticks,
            frames_rendered: self.frames_rendered,
            frames_skipped: self.frames_skipped,
            stream_ended: self.stream_ended,
        }
    }

    fn render_frame(
        &mut self,
        config: &crate::config::RenderConfig,
        metadata: FrameMetadata,
    ) -> Result<()> {
        let Some(source) = self.source.as_mut() else {
            return Err(PipelineError::capture("no frame source while active"));
        };
        if self.dims != Some(config.dims) {
            if let Some(previous) = self.dims {
                info!(
                    "grid resized from {}x{} to {}x{}",
                    previous.width, previous.height, config.dims.width, config.dims.height
                );
            }
            self.dims = Some(config.dims);
        }
        let tables = self.tables.refresh(&config.palette);
        let frame = source.current_frame(config.dims)?;
        let grid = sampler::process_frame(frame, config.filter, config.dims, tables)?
            .with_metadata(metadata);
        self.sink.draw(&grid, config)
    }

    fn frame_limit_reached(&self) -> bool {
        self.limits
            .max_frames
            .is_some_and(|max| self.frames_rendered >= max)
    }

    fn enforce_limits(&mut self, now: Instant, first_tick: Instant) {
        let frames_done = self.frame_limit_reached();
        let time_done = self
            .limits
            .max_duration
            .is_some_and(|max| now.saturating_duration_since(first_tick) >= max);
        if frames_done || time_done {
            debug!("run limit reached after {} frame(s)", self.frames_rendered);
            self.stop.request_stop();
        }
    }
}

impl<C, P, S> Drop for RenderLoop<C, P, S>
where
    C: CaptureProvider,
    P: ConfigProvider,
    S: RenderSink,
{
    fn drop(&mut self) {
        self.stop();
    }
}
