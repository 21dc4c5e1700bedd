//! Recording coordinator: device registry plus the session state machine.
//!
//! Every camera moves through `Idle → Armed → Recording → Draining → Idle`.
//! A session is armed for all selected cameras at once, each camera gets its
//! own writer(s), and `RecordingFinished` is emitted once every participating
//! camera has closed its files. Deleting a camera mid-session removes it from
//! the expected set, so the rest of the session still completes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::registry::{self, CameraSpec};
use crate::capture::{Camera, Frame, ParamValue, Parameter, Roi};
use crate::error::{Error, Result};
use crate::pipeline::acquisition::{Acquisition, CameraShared};
use crate::pipeline::filters::FilterPipeline;
use crate::recording::session::{
    Notification, RecordState, RecordType, SessionRequest, SessionTracker,
};
use crate::recording::snapshot;
use crate::recording::tiff_stack::TiffSinkFactory;
use crate::recording::writer::{FrameSink, SinkFactory, Source, StackWriter, WriterReport};
use crate::Config;

struct DeviceEntry {
    acquisition: Acquisition,
    filters: FilterPipeline,
}

/// One camera's part of a session
struct SessionCamera {
    shared: Arc<CameraShared>,
    cancel: Arc<AtomicBool>,
    writers: Vec<JoinHandle<WriterReport>>,
}

struct DurationTimer {
    cancel: flume::Sender<()>,
    thread: JoinHandle<()>,
}

struct ActiveSession {
    request: SessionRequest,
    tracker: Arc<SessionTracker>,
    cameras: HashMap<String, SessionCamera>,
    timer: Option<DurationTimer>,
}

impl ActiveSession {
    fn stop(&self) {
        for camera in self.cameras.values() {
            camera.shared.begin_draining();
        }
        if let Some(timer) = &self.timer {
            let _ = timer.cancel.try_send(());
        }
    }

    /// Wait for every writer and the timer
    fn join(self) -> Vec<WriterReport> {
        if let Some(timer) = self.timer {
            let _ = timer.cancel.try_send(());
            let _ = timer.thread.join();
        }
        let mut reports = Vec::new();
        for (key, camera) in self.cameras {
            for writer in camera.writers {
                match writer.join() {
                    Ok(report) => reports.push(report),
                    Err(_) => error!(camera = %key, "Writer thread panicked"),
                }
            }
        }
        reports
    }
}

/// Sinks opened for one camera while arming
struct ArmedCamera {
    key: String,
    shared: Arc<CameraShared>,
    filters: FilterPipeline,
    raw: Box<dyn FrameSink>,
    processed: Option<Box<dyn FrameSink>>,
}

/// Owns the registered cameras, their buffers and the recording session
pub struct Coordinator {
    config: ArcSwap<Config>,
    sinks: Arc<dyn SinkFactory>,
    devices: Mutex<HashMap<String, DeviceEntry>>,
    session: Mutex<Option<ActiveSession>>,
    stack_size: AtomicUsize,
    events_tx: flume::Sender<Notification>,
    events_rx: flume::Receiver<Notification>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
    pub fn new(config: Config, sinks: Arc<dyn SinkFactory>) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            stack_size: AtomicUsize::new(config.recording.stack_size.max(1)),
            config: ArcSwap::from_pointee(config),
            sinks,
            devices: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            events_tx,
            events_rx,
        }
    }

    /// Coordinator writing TIFF stacks
    pub fn with_tiff(config: Config) -> Self {
        Self::new(config, Arc::new(TiffSinkFactory))
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Swap the configuration; buffer sizes apply to cameras added later,
    /// recording settings to the next session
    pub fn update_config(&self, config: Config) {
        self.config.store(Arc::new(config));
    }

    /// Receiver of UI notifications
    pub fn notifications(&self) -> flume::Receiver<Notification> {
        self.events_rx.clone()
    }

    fn notify(&self, notification: Notification) {
        let _ = self.events_tx.send(notification);
    }

    /// Register a camera and start acquiring from it
    pub fn add_camera(&self, key: &str, camera: Box<dyn Camera>) -> Result<()> {
        let mut devices = lock(&self.devices);
        if devices.contains_key(key) {
            return Err(Error::DuplicateCamera(key.to_string()));
        }

        let config = self.config.load();
        let shared = Arc::new(CameraShared::new(
            key,
            &camera.roi(),
            &config.capture,
            self.stack_size.load(Ordering::Acquire),
        ));
        let acquisition = Acquisition::spawn(camera, shared, &config.capture)?;
        devices.insert(
            key.to_string(),
            DeviceEntry {
                acquisition,
                filters: FilterPipeline::default(),
            },
        );
        info!(camera = %key, "Camera added");
        Ok(())
    }

    /// Open a camera through the adapter table and register it
    pub fn add_camera_from_spec(&self, spec: &CameraSpec) -> Result<()> {
        if lock(&self.devices).contains_key(&spec.key) {
            return Err(Error::DuplicateCamera(spec.key.clone()));
        }
        let camera = registry::open(spec)?;
        self.add_camera(&spec.key, camera)
    }

    /// Deregister a camera. Never waits for its writers or its device.
    pub fn remove_camera(&self, key: &str) {
        let Some(entry) = lock(&self.devices).remove(key) else {
            return;
        };
        let shared = entry.acquisition.shared().clone();
        shared.set_recording(false);

        if let Some(active) = lock(&self.session).as_mut() {
            if let Some(camera) = active.cameras.remove(key) {
                warn!(camera = %key, "Camera removed during recording");
                camera.cancel.store(true, Ordering::Release);
                active.tracker.remove_camera(key);
                // Writers close their sinks on their own once they see the cancel flag
            }
        }
        shared.set_state(RecordState::Idle);

        // Dropping the handle stops the thread without waiting for the device
        drop(entry);
        info!(camera = %key, "Camera removed");
        self.notify(Notification::CameraDeleted {
            key: key.to_string(),
        });
    }

    pub fn camera_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.devices).keys().cloned().collect();
        keys.sort();
        keys
    }

    fn shared(&self, key: &str) -> Option<Arc<CameraShared>> {
        lock(&self.devices)
            .get(key)
            .map(|entry| entry.acquisition.shared().clone())
    }

    /// Change a camera's ROI. Returns the effective ROI, or `None` when the
    /// camera is not registered.
    pub fn change_roi(&self, key: &str, roi: Roi) -> Result<Option<Roi>> {
        let control = {
            let devices = lock(&self.devices);
            let Some(entry) = devices.get(key) else {
                return Ok(None);
            };
            if entry.acquisition.shared().state() != RecordState::Idle {
                return Err(Error::SessionActive);
            }
            entry.acquisition.control().clone()
        };

        let effective = control.change_roi(roi)?;
        info!(camera = %key, roi = ?effective, "ROI changed");
        self.notify(Notification::RoiChanged {
            key: key.to_string(),
            roi: effective,
        });
        Ok(Some(effective))
    }

    /// Frames per camera for fixed-count sessions; resizes idle recording buffers
    pub fn set_stack_size(&self, stack_size: usize) -> Result<()> {
        if stack_size == 0 {
            return Err(Error::InvalidSession("stack size must be positive".into()));
        }
        self.stack_size.store(stack_size, Ordering::Release);
        for entry in lock(&self.devices).values() {
            let shared = entry.acquisition.shared();
            if shared.state() == RecordState::Idle {
                shared.recording.configure(false, stack_size, stack_size);
            }
        }
        debug!(stack_size, "Stack size changed");
        Ok(())
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size.load(Ordering::Acquire)
    }

    pub fn change_parameter(&self, key: &str, name: &str, value: ParamValue) -> Result<()> {
        let control = match lock(&self.devices).get(key) {
            Some(entry) => entry.acquisition.control().clone(),
            None => return Ok(()),
        };
        control.change_parameter(name, value)
    }

    pub fn parameters(&self, key: &str) -> Result<Vec<Parameter>> {
        let control = match lock(&self.devices).get(key) {
            Some(entry) => entry.acquisition.control().clone(),
            None => return Ok(Vec::new()),
        };
        control.parameters()
    }

    /// Filters applied to the camera's processed stack from the next session on
    pub fn set_filters<S: AsRef<str>>(&self, key: &str, names: &[S]) -> Result<()> {
        let pipeline = FilterPipeline::from_names(names)?;
        if let Some(entry) = lock(&self.devices).get_mut(key) {
            debug!(camera = %key, filters = ?pipeline.names(), "Filters set");
            entry.filters = pipeline;
        }
        Ok(())
    }

    /// Newest live frame, for the preview
    pub fn latest_frame(&self, key: &str) -> Option<Frame> {
        self.shared(key)?.live.peek_newest()
    }

    /// `(written, read, dropped)` counters of the camera's live buffer
    pub fn live_stats(&self, key: &str) -> Option<(usize, usize, usize)> {
        Some(self.shared(key)?.live.stats())
    }

    /// Save the newest live frame. Returns false when there is nothing to save.
    pub fn snap(&self, key: &str, path: &Path) -> Result<bool> {
        let Some(frame) = self.latest_frame(key) else {
            return Ok(false);
        };
        snapshot::save_frame(&frame, path)?;
        Ok(true)
    }

    pub fn record_state(&self, key: &str) -> Option<RecordState> {
        Some(self.shared(key)?.state())
    }

    /// Whether a session is still waiting for writers
    pub fn is_recording(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|active| !active.tracker.is_finished())
    }

    /// Cameras of the running session that have not finished writing
    pub fn pending_cameras(&self) -> usize {
        lock(&self.session)
            .as_ref()
            .map_or(0, |active| active.tracker.pending_cameras())
    }

    /// Start a recording session on the requested cameras
    #[instrument(skip_all, fields(record_type = ?request.record_type, filename = %request.filename))]
    pub fn record(&self, request: SessionRequest) -> Result<()> {
        request.validate()?;
        if !self.sinks.supports(request.file_format) {
            return Err(Error::UnsupportedFormat(format!("{:?}", request.file_format)));
        }

        let mut slot = lock(&self.session);
        if slot.as_ref().is_some_and(|active| !active.tracker.is_finished()) {
            return Err(Error::SessionActive);
        }
        if let Some(previous) = slot.take() {
            previous.join();
        }

        let config = self.config.load();
        let participants = self.participants(&request);
        if participants.is_empty() {
            return Err(Error::InvalidSession(
                "none of the selected cameras is registered".into(),
            ));
        }

        let armed = match self.arm(&request, &config, participants) {
            Ok(armed) => armed,
            Err(e) => {
                error!("Failed to arm session: {}", e);
                return Err(e);
            }
        };

        let pending = armed
            .iter()
            .map(|cam| (cam.key.clone(), 1 + usize::from(cam.processed.is_some())))
            .collect();
        let tracker = Arc::new(SessionTracker::new(pending, self.events_tx.clone()));

        // Flags go up before the writers start so none of them sees an
        // idle camera with an empty buffer and quits
        for cam in &armed {
            cam.shared.set_state(RecordState::Recording);
            cam.shared.set_recording(true);
        }

        let participating: Vec<Arc<CameraShared>> =
            armed.iter().map(|cam| cam.shared.clone()).collect();
        let poll = Duration::from_millis(config.recording.writer_poll_ms.max(1));
        let mut cameras: HashMap<String, SessionCamera> = HashMap::new();
        for cam in armed {
            let cancel = Arc::new(AtomicBool::new(false));
            let mut writers = Vec::new();
            let mut stacks = vec![(Source::Recording, cam.raw, FilterPipeline::default())];
            if let Some(processed) = cam.processed {
                stacks.push((Source::Processing, processed, cam.filters.clone()));
            }
            for (source, sink, filters) in stacks {
                let writer = StackWriter::new(
                    cam.shared.clone(),
                    source,
                    sink,
                    request.record_type,
                    cancel.clone(),
                    poll,
                )
                .with_filters(filters);
                match spawn_writer(&cam.key, writer, cam.shared.clone(), tracker.clone()) {
                    Ok(handle) => writers.push(handle),
                    Err(e) => {
                        error!(camera = %cam.key, "Failed to start writer: {}", e);
                        // Started writers see the cancel flag and close on their own
                        cancel.store(true, Ordering::Release);
                        for camera in cameras.values() {
                            camera.cancel.store(true, Ordering::Release);
                        }
                        for shared in &participating {
                            shared.set_recording(false);
                            shared.set_state(RecordState::Idle);
                        }
                        return Err(e);
                    }
                }
            }
            cameras.insert(
                cam.key,
                SessionCamera {
                    shared: cam.shared,
                    cancel,
                    writers,
                },
            );
        }

        let mut timer = None;
        if request.record_type == RecordType::FixedDuration {
            match start_timer(request.acquisition_time, participating.clone()) {
                Ok(started) => timer = Some(started),
                Err(e) => {
                    // No timer means no automatic stop; end the session now
                    error!("Failed to start acquisition timer: {}", e);
                    for shared in &participating {
                        shared.begin_draining();
                    }
                }
            }
        }

        info!(cameras = cameras.len(), "Recording started");
        *slot = Some(ActiveSession {
            request,
            tracker,
            cameras,
            timer,
        });
        Ok(())
    }

    fn participants(&self, request: &SessionRequest) -> Vec<(String, Arc<CameraShared>, FilterPipeline)> {
        let devices = lock(&self.devices);
        let keys: BTreeSet<&String> = request.camera_keys.iter().collect();
        keys.into_iter()
            .filter_map(|key| match devices.get(key) {
                Some(entry) => Some((
                    key.clone(),
                    entry.acquisition.shared().clone(),
                    entry.filters.clone(),
                )),
                None => {
                    debug!(camera = %key, "Skipping unregistered camera");
                    None
                }
            })
            .collect()
    }

    /// Idle → Armed: set buffer policy and open every sink, or nothing at all
    fn arm(
        &self,
        request: &SessionRequest,
        config: &Config,
        participants: Vec<(String, Arc<CameraShared>, FilterPipeline)>,
    ) -> Result<Vec<ArmedCamera>> {
        let stack_size = request.stack_size.max(1);
        let (overwrite, capacity, target, expected) = match request.record_type {
            RecordType::FixedCount => (false, stack_size, stack_size, Some(stack_size)),
            RecordType::FixedDuration => {
                // The capacity doubles as the frame limit, so a camera faster
                // than assumed ends the stack early rather than overfilling it
                let frames = (request.acquisition_time * config.recording.assumed_fps).round();
                let capacity = (frames as usize).max(1);
                (true, capacity, capacity, None)
            }
            RecordType::Toggled => (true, self.stack_size(), 0, None),
        };

        let mut armed = Vec::with_capacity(participants.len());
        for (key, shared, filters) in participants {
            shared.set_state(RecordState::Armed);
            shared.recording.configure(overwrite, capacity, target);
            shared
                .processing
                .configure(true, config.capture.processing_buffer_size, 0);

            let opened = self
                .sinks
                .open(&request.output_path(&key, None), request.file_format, expected)
                .and_then(|raw| {
                    let processed = if filters.is_empty() {
                        None
                    } else {
                        let path = request.output_path(&key, Some("processed"));
                        Some(self.sinks.open(&path, request.file_format, None)?)
                    };
                    Ok((raw, processed))
                });

            match opened {
                Ok((raw, processed)) => {
                    debug!(camera = %key, capacity, overwrite, "Camera armed");
                    armed.push(ArmedCamera {
                        key,
                        shared,
                        filters,
                        raw,
                        processed,
                    });
                }
                Err(e) => {
                    shared.set_state(RecordState::Idle);
                    for cam in &mut armed {
                        cam.shared.set_state(RecordState::Idle);
                        let _ = cam.raw.close();
                        if let Some(processed) = cam.processed.as_mut() {
                            let _ = processed.close();
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(armed)
    }

    /// End the session: drain for fixed policies, immediate for toggled
    pub fn stop_recording(&self) {
        if let Some(active) = lock(&self.session).as_ref() {
            info!(record_type = ?active.request.record_type, "Stopping recording");
            active.stop();
        }
    }

    /// Wait for the current session's writers and return their reports.
    ///
    /// Blocks until the session ends on its own; call `stop_recording` first
    /// for toggled sessions.
    pub fn finish_session(&self) -> Vec<WriterReport> {
        let active = lock(&self.session).take();
        active.map(ActiveSession::join).unwrap_or_default()
    }

    /// Stop recording, wait for writers, stop and close every camera
    pub fn shutdown(&self) {
        self.stop_recording();
        self.finish_session();

        let devices: Vec<DeviceEntry> = lock(&self.devices).drain().map(|(_, e)| e).collect();
        for entry in devices {
            entry.acquisition.join();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_writer(
    key: &str,
    writer: StackWriter,
    shared: Arc<CameraShared>,
    tracker: Arc<SessionTracker>,
) -> Result<JoinHandle<WriterReport>> {
    let owner = key.to_string();
    let handle = thread::Builder::new()
        .name(format!("writer-{key}"))
        .spawn(move || {
            let report = writer.run();
            if tracker.writer_finished(&owner, report.path.clone()) {
                // Draining → Idle
                shared.set_state(RecordState::Idle);
            }
            report
        })?;
    Ok(handle)
}

fn start_timer(seconds: f64, cameras: Vec<Arc<CameraShared>>) -> Result<DurationTimer> {
    let (cancel, cancelled) = flume::bounded::<()>(1);
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::InvalidSession(format!("acquisition time {seconds}: {e}")))?;
    let thread = thread::Builder::new()
        .name("record-timer".into())
        .spawn(move || {
            if let Err(flume::RecvTimeoutError::Timeout) = cancelled.recv_timeout(duration) {
                info!(seconds, "Acquisition time elapsed");
                for camera in &cameras {
                    camera.begin_draining();
                }
            }
        })?;
    Ok(DurationTimer { cancel, thread })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SimulatedCamera, SimulatedConfig};
    use crate::recording::session::FileFormat;
    use std::path::PathBuf;
    use std::time::Instant;

    #[derive(Default)]
    struct CountingSinks {
        written: Arc<Mutex<HashMap<PathBuf, Vec<u64>>>>,
    }

    struct CountingSink {
        path: PathBuf,
        written: Arc<Mutex<HashMap<PathBuf, Vec<u64>>>>,
    }

    impl FrameSink for CountingSink {
        fn path(&self) -> &Path {
            &self.path
        }

        fn write(&mut self, frame: &Frame) -> Result<()> {
            lock(&self.written)
                .entry(self.path.clone())
                .or_default()
                .push(frame.sequence());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl SinkFactory for CountingSinks {
        fn supports(&self, format: FileFormat) -> bool {
            format != FileFormat::Ome
        }

        fn open(&self, path: &Path, _: FileFormat, _: Option<usize>) -> Result<Box<dyn FrameSink>> {
            Ok(Box::new(CountingSink {
                path: path.to_path_buf(),
                written: self.written.clone(),
            }))
        }
    }

    fn coordinator() -> (Coordinator, Arc<Mutex<HashMap<PathBuf, Vec<u64>>>>) {
        let sinks = CountingSinks::default();
        let written = sinks.written.clone();
        let mut config = Config::default();
        config.cameras.clear();
        (Coordinator::new(config, Arc::new(sinks)), written)
    }

    fn camera(fps: f64) -> Box<dyn Camera> {
        Box::new(SimulatedCamera::new(
            "sim",
            SimulatedConfig {
                width: 16,
                height: 16,
                fps,
                ..Default::default()
            },
        ))
    }

    fn request(keys: &[&str], record_type: RecordType) -> SessionRequest {
        SessionRequest {
            camera_keys: keys.iter().map(|k| k.to_string()).collect(),
            folder: PathBuf::from("/out"),
            filename: "run".into(),
            file_format: FileFormat::Plain,
            record_type,
            stack_size: 10,
            acquisition_time: 0.2,
        }
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

    #[test]
    fn duplicate_keys_are_rejected() {
        let (coord, _) = coordinator();
        coord.add_camera("a", camera(100.0)).unwrap();
        assert!(matches!(
            coord.add_camera("a", camera(100.0)),
            Err(Error::DuplicateCamera(k)) if k == "a"
        ));
        assert_eq!(coord.camera_keys(), vec!["a"]);
    }

    #[test]
    fn fixed_count_session_runs_to_completion() {
        let (coord, written) = coordinator();
        let events = coord.notifications();
        coord.add_camera("a", camera(50.0)).unwrap();

        coord.record(request(&["a"], RecordType::FixedCount)).unwrap();
        assert!(matches!(
            coord.record(request(&["a"], RecordType::FixedCount)),
            Err(Error::SessionActive)
        ));
        assert!(matches!(
            coord.change_roi("a", Roi::new(0, 0, 8, 8)),
            Err(Error::SessionActive)
        ));

        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            event,
            Notification::RecordingFinished {
                files: vec![PathBuf::from("/out/a_run.tif")]
            }
        );
        let reports = coord.finish_session();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].written, 10);

        let seqs = lock(&written)[&PathBuf::from("/out/a_run.tif")].clone();
        assert_eq!(seqs.len(), 10);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert!(wait_until(|| coord.record_state("a") == Some(RecordState::Idle)));
        assert!(!coord.is_recording());
    }

    #[test]
    fn fixed_duration_stack_never_exceeds_buffer_capacity() {
        for fps in [30.0, 100.0] {
            let (coord, written) = coordinator();
            coord.add_camera("a", camera(fps)).unwrap();
            let mut req = request(&["a"], RecordType::FixedDuration);
            req.acquisition_time = 0.5;

            coord.record(req).unwrap();
            let shared = coord.shared("a").unwrap();
            assert_eq!(shared.recording.capacity(), 15);
            assert_eq!(shared.recording.target_count(), 15);

            let reports = coord.finish_session();
            assert_eq!(reports.len(), 1);
            assert!(reports[0].written <= 15, "{fps} fps wrote {}", reports[0].written);
            assert!(reports[0].written > 0);
            assert_eq!(lock(&written)[&PathBuf::from("/out/a_run.tif")].len(), reports[0].written);
        }
    }

    #[test]
    fn oversized_acquisition_time_is_refused_up_front() {
        let (coord, _) = coordinator();
        coord.add_camera("a", camera(100.0)).unwrap();
        let mut req = request(&["a"], RecordType::FixedDuration);
        req.acquisition_time = 1e20;

        assert!(matches!(coord.record(req), Err(Error::InvalidSession(_))));
        assert_eq!(coord.record_state("a"), Some(RecordState::Idle));
        assert!(!coord.is_recording());
    }

    #[test]
    fn filtered_camera_gets_processed_stack() {
        let (coord, written) = coordinator();
        coord.add_camera("a", camera(200.0)).unwrap();
        coord.set_filters("a", &["invert"]).unwrap();
        assert!(matches!(
            coord.set_filters("a", &["sharpen"]),
            Err(Error::UnknownFilter(_))
        ));

        coord.record(request(&["a"], RecordType::FixedCount)).unwrap();
        let reports = coord.finish_session();
        assert_eq!(reports.len(), 2);
        let written = lock(&written);
        assert_eq!(written[&PathBuf::from("/out/a_run.tif")].len(), 10);
        assert!(written.contains_key(&PathBuf::from("/out/a_run_processed.tif")));
    }

    #[test]
    fn rejected_requests_leave_cameras_idle() {
        let (coord, _) = coordinator();
        coord.add_camera("a", camera(100.0)).unwrap();

        let mut ome = request(&["a"], RecordType::Toggled);
        ome.file_format = FileFormat::Ome;
        assert!(matches!(coord.record(ome), Err(Error::UnsupportedFormat(_))));
        assert!(matches!(
            coord.record(request(&["ghost"], RecordType::Toggled)),
            Err(Error::InvalidSession(_))
        ));
        assert_eq!(coord.record_state("a"), Some(RecordState::Idle));
        assert!(!coord.is_recording());
    }

    #[test]
    fn toggled_session_stops_on_request() {
        let (coord, _) = coordinator();
        let events = coord.notifications();
        coord.add_camera("a", camera(100.0)).unwrap();
        coord.record(request(&["a"], RecordType::Toggled)).unwrap();
        assert!(wait_until(|| coord.latest_frame("a").is_some()));

        coord.stop_recording();
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(5)).unwrap(),
            Notification::RecordingFinished { .. }
        ));
        coord.finish_session();
    }

    #[test]
    fn removing_a_camera_mid_session_completes_the_rest() {
        let (coord, _) = coordinator();
        let events = coord.notifications();
        coord.add_camera("fast", camera(200.0)).unwrap();
        // Never delivers a frame on its own
        coord
            .add_camera(
                "stuck",
                Box::new(SimulatedCamera::new(
                    "stuck",
                    SimulatedConfig {
                        width: 16,
                        height: 16,
                        miss_every: 1,
                        ..Default::default()
                    },
                )),
            )
            .unwrap();

        coord.record(request(&["fast", "stuck"], RecordType::FixedCount)).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(coord.is_recording());

        coord.remove_camera("stuck");
        coord.remove_camera("stuck");
        let received: Vec<Notification> = (0..2)
            .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(received.contains(&Notification::CameraDeleted { key: "stuck".into() }));
        assert!(received.contains(&Notification::RecordingFinished {
            files: vec![PathBuf::from("/out/fast_run.tif")]
        }));
        assert!(events.try_recv().is_err());
        assert!(!coord.is_recording());
        assert_eq!(coord.camera_keys(), vec!["fast"]);
    }

    #[test]
    fn idle_camera_operations() {
        let (coord, _) = coordinator();
        let events = coord.notifications();
        coord.add_camera("a", camera(100.0)).unwrap();

        let roi = coord.change_roi("a", Roi::new(0, 0, 8, 8)).unwrap().unwrap();
        assert_eq!((roi.width, roi.height), (8, 8));
        assert_eq!(
            events.try_recv().unwrap(),
            Notification::RoiChanged { key: "a".into(), roi }
        );
        assert_eq!(coord.change_roi("nope", roi).unwrap(), None);

        coord.change_parameter("a", "exposure", ParamValue::Float(2.0)).unwrap();
        assert!(coord.parameters("a").unwrap().iter().any(|p| p.name == "exposure"));
        assert!(coord.parameters("nope").unwrap().is_empty());

        assert!(coord.set_stack_size(0).is_err());
        coord.set_stack_size(4).unwrap();
        assert_eq!(coord.stack_size(), 4);
    }
}
