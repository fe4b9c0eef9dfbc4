// Microphone source - live capture through cpal
//
// cpal streams cannot cross threads, so each capture runs on its own thread
// that builds the stream, reports the outcome, and parks until told to stop.
// Samples flow to the owning source through a lock-free rtrb ring; the
// source drains it into a ByteAnalyser on every snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};
use tokio::runtime::RuntimeFlavor;

use super::{ByteAnalyser, CaptureConstraints, FrequencyBins, SpectrumSource, StreamInfo};
use crate::config::DetectorConfiguration;
use crate::error::{
    log_acquisition_error, log_analysis_error, AcquisitionError, AnalysisError, ErrorCode,
};
use crate::telemetry::{self, MetricEvent};

/// How long `open` waits for the capture thread to report
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Park interval of an idle capture thread
const PARK_INTERVAL: Duration = Duration::from_millis(50);

/// Ring capacity in multiples of the FFT size
const RING_FFT_MULTIPLE: usize = 4;

struct CaptureThread {
    stop: Arc<AtomicBool>,
    stream_failed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl CaptureThread {
    fn is_healthy(&self) -> bool {
        !self.stream_failed.load(Ordering::Relaxed) && !self.handle.is_finished()
    }

    fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.thread().unpark();
        if self.handle.join().is_err() {
            log::warn!("[SpectrumSource] Capture thread panicked during shutdown");
        }
    }
}

struct Capture {
    thread: CaptureThread,
    consumer: Consumer<f32>,
    sample_rate: u32,
}

/// Spectrum source backed by the default input device
pub struct MicrophoneSource {
    capture: Option<Capture>,
    analyser: Option<ByteAnalyser>,
    info: Option<StreamInfo>,
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self {
            capture: None,
            analyser: None,
            info: None,
        }
    }

    /// Current stream description, if open
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.info
    }

    fn drain_into_analyser(&mut self) {
        let (Some(capture), Some(analyser)) = (self.capture.as_mut(), self.analyser.as_mut()) else {
            return;
        };

        let available = capture.consumer.slots();
        if available == 0 {
            return;
        }
        if let Ok(chunk) = capture.consumer.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            analyser.push_samples(first);
            analyser.push_samples(second);
            chunk.commit_all();
        }
    }

    fn current_bins(&mut self) -> Result<FrequencyBins, AnalysisError> {
        self.drain_into_analyser();
        let sample_rate = self
            .capture
            .as_ref()
            .map(|c| c.sample_rate)
            .ok_or(AnalysisError::NotOpen)?;
        let analyser = self.analyser.as_mut().ok_or(AnalysisError::NotOpen)?;
        Ok(FrequencyBins::new(analyser.byte_frequency_data(), sample_rate))
    }

    /// Rebuild capture and analyser on the constraint step that opened them
    fn reacquire(&mut self) -> Result<(), AnalysisError> {
        let info = self.info.ok_or(AnalysisError::NotOpen)?;

        if let Some(capture) = self.capture.take() {
            capture.thread.shutdown();
        }

        let constraints = info.constraints.unwrap_or(CaptureConstraints::Plain);
        let capture = off_worker(|| start_capture(constraints, info.fft_size))
            .map_err(|reason| AnalysisError::RecoveryFailed { reason })?;
        self.capture = Some(capture);
        self.analyser = Some(ByteAnalyser::new(info.fft_size));
        Ok(())
    }

    fn open_ladder(
        &mut self,
        config: &DetectorConfiguration,
    ) -> Result<StreamInfo, AcquisitionError> {
        let fft_size = config.fft_size();
        let mut failures = Vec::new();

        for constraints in CaptureConstraints::ladder() {
            match start_capture(constraints, fft_size) {
                Ok(capture) => {
                    let info = StreamInfo {
                        sample_rate: capture.sample_rate,
                        fft_size,
                        constraints: Some(constraints),
                    };
                    log::info!(
                        "[SpectrumSource] Microphone opened ({} constraints, {} Hz, fft {})",
                        constraints.label(),
                        info.sample_rate,
                        fft_size
                    );
                    self.capture = Some(capture);
                    self.analyser = Some(ByteAnalyser::new(fft_size));
                    self.info = Some(info);
                    telemetry::hub().record(MetricEvent::SourceOpened {
                        simulated: false,
                        sample_rate: info.sample_rate,
                        fft_size,
                    });
                    return Ok(info);
                }
                Err(reason) => {
                    log::warn!(
                        "[SpectrumSource] {} constraints rejected: {}",
                        constraints.label(),
                        reason
                    );
                    failures.push(reason);
                }
            }
        }

        let err = classify_ladder(&failures);
        log_acquisition_error(&err, "MicrophoneSource::open");
        telemetry::hub().record(MetricEvent::AcquisitionFailed { code: err.code() });
        Err(err)
    }
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumSource for MicrophoneSource {
    /// Walk the constraint ladder until one step opens
    ///
    /// Each step waits up to `OPEN_TIMEOUT` for the capture thread. On a
    /// multi-threaded tokio runtime the wait runs in `block_in_place`; on a
    /// current-thread runtime it blocks the calling task.
    fn open(&mut self, config: &DetectorConfiguration) -> Result<StreamInfo, AcquisitionError> {
        if self.is_open() {
            self.close();
        }
        off_worker(|| self.open_ladder(config))
    }

    fn snapshot(&mut self) -> Result<FrequencyBins, AnalysisError> {
        let capture = self.capture.as_ref().ok_or(AnalysisError::NotOpen)?;

        if capture.thread.is_healthy() {
            return self.current_bins();
        }

        let failure = AnalysisError::ReadFailed {
            reason: "input stream reported an error".to_string(),
        };
        log_analysis_error(&failure, "MicrophoneSource::snapshot");

        match self.reacquire() {
            Ok(()) => {
                log::info!("[SpectrumSource] Re-acquired analyser after read failure");
                telemetry::hub().record(MetricEvent::Recovery { succeeded: true });
                self.current_bins()
            }
            Err(err) => {
                log_analysis_error(&err, "MicrophoneSource::reacquire");
                telemetry::hub().record(MetricEvent::Recovery { succeeded: false });
                self.analyser = None;
                Err(err)
            }
        }
    }

    fn close(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.thread.shutdown();
            log::info!("[SpectrumSource] Microphone released");
        }
        self.analyser = None;
        self.info = None;
    }

    fn is_open(&self) -> bool {
        self.capture.is_some()
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Classify a rejected ladder
///
/// The first specific classification wins; otherwise the last step's error.
fn classify_ladder(failures: &[String]) -> AcquisitionError {
    let mut generic = None;
    for reason in failures {
        match AcquisitionError::classify(reason) {
            err @ AcquisitionError::Unknown { .. } => generic = Some(err),
            err => return err,
        }
    }
    generic.unwrap_or_else(|| AcquisitionError::Unknown {
        details: "no capture attempt made".to_string(),
    })
}

/// Run a blocking device wait off the async worker when the runtime allows it
fn off_worker<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Spawn a capture thread for one constraint step
///
/// Returns the platform error text on failure so the caller can classify it.
fn start_capture(constraints: CaptureConstraints, fft_size: usize) -> Result<Capture, String> {
    let (producer, consumer) = RingBuffer::<f32>::new(fft_size * RING_FFT_MULTIPLE);
    let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();

    let stop = Arc::new(AtomicBool::new(false));
    let stream_failed = Arc::new(AtomicBool::new(false));

    let thread_stop = Arc::clone(&stop);
    let thread_failed = Arc::clone(&stream_failed);

    let handle = thread::Builder::new()
        .name("angelic-capture".to_string())
        .spawn(move || {
            let stream = match build_input_stream(constraints, fft_size, producer, &thread_failed) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    stream
                }
                Err(reason) => {
                    let _ = ready_tx.send(Err(reason));
                    return;
                }
            };

            while !thread_stop.load(Ordering::Relaxed) {
                thread::park_timeout(PARK_INTERVAL);
            }

            drop(stream);
        })
        .map_err(|e| format!("failed to spawn capture thread: {}", e))?;

    let thread = CaptureThread {
        stop,
        stream_failed,
        handle,
    };

    match ready_rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(Ok(sample_rate)) => Ok(Capture {
            thread,
            consumer,
            sample_rate,
        }),
        Ok(Err(reason)) => {
            thread.shutdown();
            Err(reason)
        }
        Err(_) => {
            thread.shutdown();
            Err("timed out waiting for the input device".to_string())
        }
    }
}

fn build_input_stream(
    constraints: CaptureConstraints,
    fft_size: usize,
    mut producer: Producer<f32>,
    stream_failed: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "No input device found".to_string())?;

    let supported = match constraints {
        CaptureConstraints::FixedSampleRate { sample_rate } => device
            .supported_input_configs()
            .map_err(|e| e.to_string())?
            .filter(|range| range.sample_format() == cpal::SampleFormat::F32)
            .find(|range| {
                range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
            })
            .map(|range| range.with_sample_rate(cpal::SampleRate(sample_rate)))
            .ok_or_else(|| format!("no F32 input configuration supports {} Hz", sample_rate))?,
        _ => device.default_input_config().map_err(|e| e.to_string())?,
    };

    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err("Only F32 sample format is supported for input".to_string());
    }

    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(frames) = constraints.buffer_frames(fft_size) {
        stream_config.buffer_size = cpal::BufferSize::Fixed(frames);
    }
    let channels = stream_config.channels.max(1) as usize;
    let sample_rate = stream_config.sample_rate.0;

    let failed = Arc::clone(stream_failed);
    let err_fn = move |err: cpal::StreamError| {
        log::error!("[SpectrumSource] Input stream error: {}", err);
        failed.store(true, Ordering::Relaxed);
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // First channel only; drop samples when the reader falls behind
                for frame in data.chunks(channels) {
                    if producer.push(frame[0]).is_err() {
                        break;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok((stream, sample_rate))
}
