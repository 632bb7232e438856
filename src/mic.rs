//! Local microphone handling.
//!
//! Voice audio itself travels through the remote session, not through
//! us; what this module owns is the local capture claim. Acquiring it
//! doubles as the permission/availability probe at startup, and the
//! mute toggle pauses or resumes the capture stream the way a track
//! enable flag would.
//!
//! `cpal::Stream` is not `Send`, so a dedicated thread owns the device
//! and stream and takes commands over a channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MicError {
    #[error("No default input device available")]
    NoDevice,
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Capture thread is gone")]
    Closed,
}

enum MicCommand {
    SetEnabled(bool),
    Shutdown,
}

/// Handle to the capture thread
pub struct MicCapture {
    tx: mpsc::Sender<MicCommand>,
    enabled: bool,
}

fn log_stream_error(err: cpal::StreamError) {
    log::warn!("Mic stream error: {}", err);
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
) -> Result<cpal::Stream, MicError> {
    let stream_config: cpal::StreamConfig = config.config();
    // Captured samples are dropped; the session transports the voice
    let stream = match config.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            |_data: &[i16], _: &cpal::InputCallbackInfo| {},
            log_stream_error,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            |_data: &[f32], _: &cpal::InputCallbackInfo| {},
            log_stream_error,
            None,
        ),
        format => {
            return Err(MicError::Device(format!("Unsupported format: {:?}", format)));
        }
    }
    .map_err(|e| MicError::Stream(e.to_string()))?;
    Ok(stream)
}

impl MicCapture {
    /// Open the default input device and start capturing.
    ///
    /// Failure here means voice input is unavailable; callers report it
    /// and carry on with input muted.
    pub fn acquire() -> Result<Self, MicError> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match host.default_input_device() {
                    Some(device) => device,
                    None => {
                        let _ = ready_tx.send(Err(MicError::NoDevice));
                        return;
                    }
                };
                let config = match device.default_input_config() {
                    Ok(config) => config,
                    Err(e) => {
                        let _ = ready_tx.send(Err(MicError::Device(e.to_string())));
                        return;
                    }
                };
                let stream = match build_stream(&device, &config) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(MicError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(device.name().unwrap_or_default()));

                while let Ok(command) = rx.recv() {
                    match command {
                        MicCommand::SetEnabled(true) => {
                            if let Err(e) = stream.play() {
                                log::warn!("Failed to resume mic stream: {}", e);
                            }
                        }
                        MicCommand::SetEnabled(false) => {
                            if let Err(e) = stream.pause() {
                                log::warn!("Failed to pause mic stream: {}", e);
                            }
                        }
                        MicCommand::Shutdown => break,
                    }
                }
            })
            .map_err(|e| MicError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(name)) => {
                log::info!("Microphone ready: {}", name);
                Ok(Self { tx, enabled: true })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MicError::Closed),
        }
    }

    /// Enable or disable capture without releasing the device
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), MicError> {
        self.tx
            .send(MicCommand::SetEnabled(enabled))
            .map_err(|_| MicError::Closed)?;
        self.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        let _ = self.tx.send(MicCommand::Shutdown);
    }
}

#[cfg(all(test, feature = "test-audio"))]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_toggle() {
        let mut mic = MicCapture::acquire().expect("input device");
        assert!(mic.is_enabled());
        mic.set_enabled(false).unwrap();
        assert!(!mic.is_enabled());
        mic.set_enabled(true).unwrap();
        assert!(mic.is_enabled());
    }
}
