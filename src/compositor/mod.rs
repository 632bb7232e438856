//! Per-frame chroma-key compositing, synchronized to source playback.
//!
//! The compositor idles until the source reports it is playing, then
//! processes the latest decoded frame once per display tick until the
//! source pauses, the stream ends, or it is cancelled. It never runs
//! busier than the display clock and never needs a manual restart: the
//! source's own playback events arm and idle it.

pub mod chroma;

use crate::media::{Canvas, PlaybackEvent, VideoSource};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use chroma::{key_out_background, ChromaKeyConfig};

/// Scheduling state of the per-frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorState {
    /// No per-frame work pending
    Idle,
    /// A start trigger was observed; frame work begins next tick
    Armed,
    /// Actively processing and rescheduling
    Running,
}

/// Ticks at most once per rendered frame. The production clock is the
/// host display refresh; tests drive ticks by hand.
#[async_trait::async_trait]
pub trait FrameClock: Send {
    async fn tick(&mut self);
}

/// Display-refresh stand-in: a fixed interval at the refresh period,
/// skipping missed ticks instead of bursting to catch up.
pub struct RefreshClock {
    interval: tokio::time::Interval,
}

impl RefreshClock {
    pub fn new(refresh_hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait::async_trait]
impl FrameClock for RefreshClock {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// The frame-processing state machine.
///
/// All per-tick work happens in [`FrameCompositor::tick`]; the async
/// driver [`run_compositor`] wires it to a clock and a playback feed.
pub struct FrameCompositor {
    state: CompositorState,
    playing: bool,
    config: ChromaKeyConfig,
    canvas: Canvas,
    cancel: CancellationToken,
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self::new(ChromaKeyConfig::default())
    }
}

impl FrameCompositor {
    pub fn new(config: ChromaKeyConfig) -> Self {
        Self::with_cancel_token(config, CancellationToken::new())
    }

    /// Share teardown with the session: cancelling `cancel` (for example
    /// the session controller's frame token) stops this compositor too.
    pub fn with_cancel_token(config: ChromaKeyConfig, cancel: CancellationToken) -> Self {
        Self {
            state: CompositorState::Idle,
            playing: false,
            config,
            canvas: Canvas::new(),
            cancel,
        }
    }

    pub fn state(&self) -> CompositorState {
        self.state
    }

    /// The composited output surface
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Token observed by the driver; cancelling it stops scheduling
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all frame scheduling. Synchronous and idempotent.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.state = CompositorState::Idle;
    }

    /// Feed a playback event from the source. Playing arms the loop;
    /// Paused and Ended let it idle on the next tick.
    pub fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Playing => {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.playing = true;
                if self.state == CompositorState::Idle {
                    self.state = CompositorState::Armed;
                    log::debug!("compositor armed");
                }
            }
            PlaybackEvent::Paused | PlaybackEvent::Ended => {
                self.playing = false;
            }
        }
    }

    /// Whether the loop wants another tick
    pub fn is_scheduled(&self) -> bool {
        self.state != CompositorState::Idle
    }

    /// One unit of per-frame work. Returns whether the loop stays
    /// scheduled.
    ///
    /// A tick with no decoded frame or unknown dimensions reschedules
    /// without touching the canvas; a tick after pause/end or
    /// cancellation returns the machine to Idle.
    pub fn tick(&mut self, source: &mut dyn VideoSource) -> bool {
        if self.cancel.is_cancelled() {
            self.state = CompositorState::Idle;
            return false;
        }
        if self.state == CompositorState::Idle {
            return false;
        }
        if !self.playing {
            log::debug!("compositor idling: source stopped");
            self.state = CompositorState::Idle;
            return false;
        }

        let (width, height) = source.dimensions();
        if source.has_frame() && width > 0 && height > 0 {
            self.canvas.resize(width, height);
            source.copy_frame_into(self.canvas.pixels_mut());
            chroma::key_out_background(self.canvas.pixels_mut(), &self.config);
        }

        self.state = CompositorState::Running;
        true
    }
}

/// Drive a compositor against a source until cancellation.
///
/// Playback events arm and idle the state machine; the clock bounds the
/// frame rate. The compositor is shared so the presentation side can
/// read the canvas between ticks.
pub async fn run_compositor<S, C>(
    compositor: Arc<Mutex<FrameCompositor>>,
    mut source: S,
    mut playback: mpsc::Receiver<PlaybackEvent>,
    mut clock: C,
) where
    S: VideoSource,
    C: FrameClock,
{
    let cancel = compositor.lock().unwrap().cancel_token();

    loop {
        let scheduled = compositor.lock().unwrap().is_scheduled();
        tokio::select! {
            _ = cancel.cancelled() => {
                compositor.lock().unwrap().cancel();
                break;
            }
            event = playback.recv() => match event {
                Some(event) => compositor.lock().unwrap().on_playback(event),
                None => {
                    // Source is gone; nothing will ever arm us again
                    compositor.lock().unwrap().cancel();
                    break;
                }
            },
            _ = clock.tick(), if scheduled => {
                compositor.lock().unwrap().tick(&mut source);
            }
        }
    }

    log::debug!("compositor loop finished");
}
