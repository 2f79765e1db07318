//! Audio device access.
//!
//! # Design constraints
//!
//! The cpal callbacks run on an OS audio thread at elevated priority. They
//! must not block on a contended mutex or perform I/O. Input samples are
//! downmixed and written straight into an SPSC ring producer; output voices
//! arrive through a command ring (see [`output`]).
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Streams are therefore opened and dropped on the session control
//! thread, which is why [`InputStream`] and [`OutputDevice`] carry no `Send`
//! bound while [`AudioBackend`] itself does.

pub mod capture;
pub mod device;
#[cfg(feature = "audio-cpal")]
pub mod output;
pub mod resample;

use std::sync::{atomic::AtomicBool, Arc};

use crate::{
    buffering::AudioProducer,
    error::Result,
    playback::{tap::AnalysisTap, OutputDevice, PlaybackConfig},
    session::events::SessionEventSink,
};

use capture::CaptureConfig;

/// An open microphone stream. Dropping it releases the device.
pub trait InputStream {
    /// Rate the device actually delivers (Hz); may differ from the request.
    fn sample_rate(&self) -> u32;
}

/// Factory for the two device streams a session needs.
pub trait AudioBackend: Send {
    /// Open the microphone. Mono f32 samples at [`InputStream::sample_rate`]
    /// are pushed into `producer` while `running` is `true`.
    ///
    /// # Errors
    /// `AgentError::PermissionDenied` or `AgentError::DeviceUnavailable`.
    fn open_input(
        &mut self,
        config: &CaptureConfig,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        events: SessionEventSink,
    ) -> Result<Box<dyn InputStream>>;

    /// Open the speaker. Rendered output is copied into `tap`.
    fn open_output(
        &mut self,
        config: &PlaybackConfig,
        tap: Arc<AnalysisTap>,
        events: SessionEventSink,
    ) -> Result<Box<dyn OutputDevice>>;
}

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;

#[cfg(feature = "audio-cpal")]
mod cpal_backend {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use super::{output::CpalOutput, AudioBackend, CaptureConfig, InputStream};
    use crate::{
        buffering::{AudioProducer, Producer},
        error::{AgentError, Result},
        playback::{tap::AnalysisTap, OutputDevice, PlaybackConfig},
        session::events::{SessionEvent, SessionEventSink},
    };

    /// Default-host cpal backend.
    #[derive(Debug, Default, Clone)]
    pub struct CpalBackend;

    impl CpalBackend {
        pub fn new() -> Self {
            Self
        }
    }

    /// Handle to an active cpal capture stream.
    ///
    /// **Not `Send`**: create and drop on the same OS thread.
    struct CpalInput {
        /// Kept alive so the stream is not dropped prematurely.
        _stream: Stream,
        sample_rate: u32,
    }

    impl InputStream for CpalInput {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    /// Classify a cpal failure. Backends report a refused microphone as a
    /// backend-specific error, so the text is the only signal available.
    pub(crate) fn classify_device_error(message: String) -> AgentError {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("not authorized")
        {
            AgentError::PermissionDenied(message)
        } else if ["not available", "no longer available", "no such device"]
            .iter()
            .any(|k| lowered.contains(k))
        {
            AgentError::DeviceUnavailable(message)
        } else {
            AgentError::AudioStream(message)
        }
    }

    fn select_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
        if let Some(preferred_name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(found) = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    }) {
                        return Ok(found);
                    }
                    warn!(
                        "preferred input device '{}' not found, falling back",
                        preferred_name
                    );
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        if let Some(default) = host.default_input_device() {
            return Ok(default);
        }
        let mut devices = host
            .input_devices()
            .map_err(|e| classify_device_error(e.to_string()))?;
        warn!("no default input device, falling back to first available input");
        devices
            .next()
            .ok_or_else(|| AgentError::DeviceUnavailable("no microphone found".into()))
    }

    /// Prefer a configuration that opens at the requested rate so no
    /// resampling is needed; otherwise take the device default.
    fn select_input_config(
        device: &cpal::Device,
        wanted_rate: u32,
    ) -> Result<cpal::SupportedStreamConfig> {
        let usable = |fmt: SampleFormat| {
            matches!(fmt, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U8)
        };
        if let Ok(ranges) = device.supported_input_configs() {
            let mut ranges: Vec<_> = ranges
                .filter(|r| usable(r.sample_format()))
                .filter(|r| r.min_sample_rate().0 <= wanted_rate && r.max_sample_rate().0 >= wanted_rate)
                .collect();
            ranges.sort_by_key(|r| r.channels());
            if let Some(range) = ranges.into_iter().next() {
                return Ok(range.with_sample_rate(SampleRate(wanted_rate)));
            }
        }
        device
            .default_input_config()
            .map_err(|e| classify_device_error(e.to_string()))
    }

    fn build_input<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        events: SessionEventSink,
    ) -> Result<Stream>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let ch = config.channels.max(1) as usize;
        let mut mix_buf: Vec<f32> = Vec::with_capacity(8192);
        device
            .build_input_stream(
                config,
                move |data: &[T], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    mix_buf.resize(frames, 0.0);
                    for (f, slot) in mix_buf.iter_mut().enumerate() {
                        let base = f * ch;
                        let mut sum = 0f32;
                        for c in 0..ch {
                            sum += f32::from_sample(data[base + c]);
                        }
                        *slot = sum / ch as f32;
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!("capture ring full: dropped {} frames", mix_buf.len() - written);
                    }
                },
                move |err| {
                    error!("input stream error: {err}");
                    events.emit(SessionEvent::DeviceFailed(err.to_string()));
                },
                None,
            )
            .map_err(|e| classify_device_error(e.to_string()))
    }

    impl AudioBackend for CpalBackend {
        fn open_input(
            &mut self,
            config: &CaptureConfig,
            producer: AudioProducer,
            running: Arc<AtomicBool>,
            events: SessionEventSink,
        ) -> Result<Box<dyn InputStream>> {
            let host = cpal::default_host();
            let device = select_input_device(&host, config.preferred_device.as_deref())?;
            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let supported = select_input_config(&device, config.sample_rate)?;
            let sample_rate = supported.sample_rate().0;
            let stream_config = StreamConfig {
                channels: supported.channels(),
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            info!(sample_rate, channels = stream_config.channels, "input config selected");

            let stream = match supported.sample_format() {
                SampleFormat::F32 => {
                    build_input::<f32>(&device, &stream_config, producer, running, events)?
                }
                SampleFormat::I16 => {
                    build_input::<i16>(&device, &stream_config, producer, running, events)?
                }
                SampleFormat::U8 => {
                    build_input::<u8>(&device, &stream_config, producer, running, events)?
                }
                fmt => {
                    return Err(AgentError::DeviceUnavailable(format!(
                        "unsupported input sample format: {fmt:?}"
                    )))
                }
            };

            stream
                .play()
                .map_err(|e| classify_device_error(e.to_string()))?;

            Ok(Box::new(CpalInput {
                _stream: stream,
                sample_rate,
            }))
        }

        fn open_output(
            &mut self,
            config: &PlaybackConfig,
            tap: Arc<AnalysisTap>,
            events: SessionEventSink,
        ) -> Result<Box<dyn OutputDevice>> {
            let output = CpalOutput::open(config, tap, events)?;
            Ok(Box::new(output))
        }
    }

}
