//! Per-camera acquisition thread

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{Camera, Frame, FrameShape, ParamValue, Parameter, PixelFormat, Roi};
use crate::error::{Error, Result};
use crate::pipeline::ringbuf::{AddOutcome, FrameBuffer};
use crate::recording::RecordState;
use crate::CaptureConfig;

/// State of one camera shared between its acquisition thread, its writers
/// and the coordinator
pub struct CameraShared {
    pub key: String,
    /// Feeds the live preview
    pub live: FrameBuffer,
    /// Feeds the raw stack writer
    pub recording: FrameBuffer,
    /// Feeds the filtered stack writer
    pub processing: FrameBuffer,
    recording_enabled: AtomicBool,
    state: AtomicU8,
}

impl CameraShared {
    pub fn new(key: impl Into<String>, roi: &Roi, config: &CaptureConfig, stack_size: usize) -> Self {
        let key = key.into();
        let shape = FrameShape::new(roi.width, roi.height, PixelFormat::Mono8);
        let recording = FrameBuffer::new(format!("{key}/recording"), stack_size, shape);
        recording.configure(false, stack_size, stack_size);
        Self {
            live: FrameBuffer::new(format!("{key}/live"), config.live_buffer_size, shape),
            processing: FrameBuffer::new(
                format!("{key}/processing"),
                config.processing_buffer_size,
                shape,
            ),
            recording,
            key,
            recording_enabled: AtomicBool::new(false),
            state: AtomicU8::new(RecordState::Idle as u8),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording_enabled.load(Ordering::Acquire)
    }

    pub fn set_recording(&self, enabled: bool) {
        self.recording_enabled.store(enabled, Ordering::Release);
    }

    pub fn state(&self) -> RecordState {
        RecordState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: RecordState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Recording → Draining, if still recording. Closes the session buffers,
    /// so a frame already in flight in `distribute` is rejected rather than
    /// queued behind a writer that has finished draining.
    pub fn begin_draining(&self) {
        self.set_recording(false);
        self.recording.close();
        self.processing.close();
        let _ = self.state.compare_exchange(
            RecordState::Recording as u8,
            RecordState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Hand one grabbed frame to every active sink
    pub fn distribute(&self, frame: Frame) {
        let recording = self.is_recording();
        self.live.add_frame(frame.clone());
        if !recording {
            return;
        }
        self.processing.add_frame(frame.clone());
        if self.recording.add_frame(frame) == AddOutcome::TargetReached {
            debug!(camera = %self.key, "Stack complete");
            self.begin_draining();
        }
    }

    fn change_roi(&self, roi: &Roi) {
        self.live.change_roi(roi);
        self.recording.change_roi(roi);
        self.processing.change_roi(roi);
    }
}

/// Device requests executed on the acquisition thread
enum Command {
    ChangeRoi {
        roi: Roi,
        reply: flume::Sender<Result<Roi>>,
    },
    ChangeParameter {
        name: String,
        value: ParamValue,
        reply: flume::Sender<Result<()>>,
    },
    ListParameters {
        reply: flume::Sender<Vec<Parameter>>,
    },
}

#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    idle_backoff: Duration,
    error_backoff: Duration,
}

/// Cloneable handle marshalling device requests onto the acquisition thread
#[derive(Clone)]
pub struct DeviceControl {
    key: String,
    commands: flume::Sender<Command>,
}

impl DeviceControl {
    fn request<T>(&self, build: impl FnOnce(flume::Sender<T>) -> Command) -> Result<T> {
        let (reply, answer) = flume::bounded(1);
        self.commands
            .send(build(reply))
            .map_err(|_| Error::Disconnected(self.key.clone()))?;
        answer.recv().map_err(|_| Error::Disconnected(self.key.clone()))
    }

    /// Apply an ROI; returns the ROI the device actually uses
    pub fn change_roi(&self, roi: Roi) -> Result<Roi> {
        self.request(|reply| Command::ChangeRoi { roi, reply })?
    }

    pub fn change_parameter(&self, name: &str, value: ParamValue) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| Command::ChangeParameter { name, value, reply })?
    }

    pub fn parameters(&self) -> Result<Vec<Parameter>> {
        self.request(|reply| Command::ListParameters { reply })
    }
}

/// Handle to a running acquisition thread
pub struct Acquisition {
    shared: Arc<CameraShared>,
    control: DeviceControl,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Acquisition {
    /// Start the device and move it onto its own thread
    pub fn spawn(
        mut camera: Box<dyn Camera>,
        shared: Arc<CameraShared>,
        config: &CaptureConfig,
    ) -> Result<Self> {
        camera.set_acquisition_status(true)?;

        let (tx, rx) = flume::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let settings = LoopSettings {
            idle_backoff: Duration::from_millis(config.idle_backoff_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
        };

        let thread = {
            let shared = shared.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("acq-{}", shared.key))
                .spawn(move || run(camera, shared, rx, stop, settings))?
        };

        Ok(Self {
            control: DeviceControl {
                key: shared.key.clone(),
                commands: tx,
            },
            shared,
            stop,
            thread: Some(thread),
        })
    }

    pub fn shared(&self) -> &Arc<CameraShared> {
        &self.shared
    }

    pub fn control(&self) -> &DeviceControl {
        &self.control
    }

    /// Ask the thread to stop after its current grab
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop and wait for the device to be closed
    pub fn join(mut self) {
        self.signal_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(camera = %self.shared.key, "Acquisition thread panicked");
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        // Dropping without join detaches the thread
        self.signal_stop();
    }
}

#[instrument(skip_all, fields(camera = %shared.key))]
fn run(
    mut camera: Box<dyn Camera>,
    shared: Arc<CameraShared>,
    commands: flume::Receiver<Command>,
    stop: Arc<AtomicBool>,
    settings: LoopSettings,
) {
    info!(device = camera.name(), "Acquisition started");
    let grabbed = counter!("livestack_frames_grabbed_total", "camera" => shared.key.clone());
    let misses = counter!("livestack_capture_misses_total", "camera" => shared.key.clone());

    while !stop.load(Ordering::Acquire) {
        for command in commands.try_iter() {
            handle(camera.as_mut(), &shared, command);
        }

        match camera.grab_frame() {
            Ok(Some(frame)) => {
                grabbed.increment(1);
                shared.distribute(frame);
            }
            Ok(None) => {
                misses.increment(1);
                thread::sleep(settings.idle_backoff);
            }
            Err(e) => {
                warn!("Capture error: {}", e);
                thread::sleep(settings.error_backoff);
            }
        }
    }

    if let Err(e) = camera.set_acquisition_status(false) {
        warn!("Failed to stop acquisition: {}", e);
    }
    if let Err(e) = camera.close() {
        warn!("Failed to close camera: {}", e);
    }
    info!("Acquisition stopped");
}

fn handle(camera: &mut dyn Camera, shared: &CameraShared, command: Command) {
    match command {
        Command::ChangeRoi { roi, reply } => {
            let result = camera.change_roi(roi).map(|()| {
                let effective = camera.roi();
                if !(roi.contained_in(&effective) && effective.contained_in(&roi)) {
                    info!(requested = ?roi, effective = ?effective, "Device adjusted ROI");
                }
                shared.change_roi(&effective);
                effective
            });
            let _ = reply.send(result);
        }
        Command::ChangeParameter { name, value, reply } => {
            debug!(%name, %value, "Changing parameter");
            let _ = reply.send(camera.change_parameter(&name, value));
        }
        Command::ListParameters { reply } => {
            let _ = reply.send(camera.parameters());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SimulatedCamera, SimulatedConfig};
    use std::time::Instant;

    fn camera(width: u32, height: u32) -> Box<dyn Camera> {
        Box::new(SimulatedCamera::new(
            "sim",
            SimulatedConfig {
                width,
                height,
                fps: 500.0,
                ..Default::default()
            },
        ))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn start(width: u32, height: u32) -> Acquisition {
        let config = CaptureConfig::default();
        let shared = Arc::new(CameraShared::new("sim", &Roi::full(width, height), &config, 5));
        Acquisition::spawn(camera(width, height), shared, &config).unwrap()
    }

    #[test]
    fn live_buffer_fills_without_recording() {
        let acq = start(8, 8);
        let shared = acq.shared().clone();
        assert!(wait_until(|| shared.live.peek_newest().is_some()));
        assert!(shared.recording.is_empty());
        assert!(shared.processing.is_empty());
        acq.join();
    }

    #[test]
    fn recording_flag_fans_out_and_stops_at_target() {
        let acq = start(8, 8);
        let shared = acq.shared().clone();
        shared.set_state(RecordState::Recording);
        shared.set_recording(true);

        assert!(wait_until(|| shared.state() == RecordState::Draining));
        assert!(!shared.is_recording());
        assert!(shared.recording.is_closed());
        assert!(shared.processing.is_closed());
        assert_eq!(shared.recording.len(), 5);
        assert!(!shared.processing.is_empty());

        let seqs: Vec<u64> = std::iter::from_fn(|| shared.recording.pop_oldest())
            .map(|f| f.sequence())
            .collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        acq.join();
    }

    #[test]
    fn frame_in_flight_after_stop_is_not_queued() {
        let config = CaptureConfig::default();
        let shared = CameraShared::new("cam", &Roi::full(4, 4), &config, 10);
        shared.recording.configure(true, 10, 0);
        shared.set_state(RecordState::Recording);
        shared.set_recording(true);
        let frame = |seq| Frame::new(vec![0u8; 16], seq, 4, 4, PixelFormat::Mono8).unwrap();
        shared.distribute(frame(0));

        // Producer already saw the flag up when the stop lands
        shared.begin_draining();
        assert_eq!(shared.recording.add_frame(frame(1)), AddOutcome::Rejected);
        assert_eq!(shared.processing.add_frame(frame(1)), AddOutcome::Rejected);
        assert_eq!(shared.state(), RecordState::Draining);

        let seqs: Vec<u64> = std::iter::from_fn(|| shared.recording.pop_oldest())
            .map(|f| f.sequence())
            .collect();
        assert_eq!(seqs, vec![0]);
    }

    #[test]
    fn roi_change_runs_on_acquisition_thread_and_resets_buffers() {
        let acq = start(16, 16);
        let shared = acq.shared().clone();
        assert!(wait_until(|| !shared.live.is_empty()));

        let effective = acq.control().change_roi(Roi::new(1, 0, 9, 8)).unwrap();
        assert_eq!((effective.offset_x, effective.width, effective.height), (0, 8, 8));
        assert!(wait_until(|| shared
            .live
            .peek_newest()
            .is_some_and(|f| f.meta.width == 8)));

        assert!(matches!(
            acq.control().change_roi(Roi::new(10, 0, 10, 10)),
            Err(Error::InvalidRoi { .. })
        ));
        assert!(matches!(
            acq.control().change_parameter("gain", ParamValue::Int(1)),
            Err(Error::UnknownParameter(_))
        ));
        assert_eq!(acq.control().parameters().unwrap().len(), 3);
        acq.join();
    }
}
