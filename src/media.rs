//! Media-side boundary types: the stream handle delivered by the
//! service, the decoded-frame source the compositor reads from, and the
//! destination surface it writes to.

/// Handle to the session's media stream. Carried by the stream-ready
/// event; audio controls apply when the stream is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaStream {
    pub id: String,
    pub audio_muted: bool,
    pub volume: f32,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            audio_muted: true,
            volume: 0.0,
        }
    }
}

/// Playback lifecycle of a video source. The compositor arms and idles
/// on these rather than on a timer of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Playing,
    Paused,
    Ended,
}

/// A live source of decoded RGBA frames.
///
/// Implementations wrap whatever actually decodes the stream; the
/// compositor only needs the latest full frame and the intrinsic size.
pub trait VideoSource: Send {
    /// Intrinsic dimensions; (0, 0) until the source knows them
    fn dimensions(&self) -> (u32, u32);

    /// Whether a full decoded frame is available right now
    fn has_frame(&self) -> bool;

    /// Copy the current frame into `dest`, which is sized
    /// `width * height * 4` bytes of RGBA
    fn copy_frame_into(&mut self, dest: &mut [u8]);
}

/// Destination pixel surface. One RGBA buffer, overwritten per tick;
/// no historical frames are retained.
#[derive(Debug, Default)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the source dimensions, reallocating only when they change
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0u8; (width as usize) * (height as usize) * 4];
        log::debug!("canvas resized to {}x{}", width, height);
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}
