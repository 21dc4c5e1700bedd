//! Stack writer draining a camera buffer into a file sink

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use metrics::counter;
use tracing::{error, info, instrument, warn};

use crate::capture::Frame;
use crate::error::Result;
use crate::pipeline::acquisition::CameraShared;
use crate::pipeline::filters::FilterPipeline;
use crate::pipeline::ringbuf::FrameBuffer;
use crate::recording::session::{FileFormat, RecordType};

/// Destination of one stack
pub trait FrameSink: Send {
    fn path(&self) -> &Path;

    /// Append one frame to the stack
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize the file and release the handle
    fn close(&mut self) -> Result<()>;
}

/// Opens sinks for a session
pub trait SinkFactory: Send + Sync {
    fn supports(&self, format: FileFormat) -> bool;

    /// `expected_frames` is known for fixed-count sessions only
    fn open(
        &self,
        path: &Path,
        format: FileFormat,
        expected_frames: Option<usize>,
    ) -> Result<Box<dyn FrameSink>>;
}

/// Which of the camera's buffers a writer drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Recording,
    Processing,
}

/// Outcome of one writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterReport {
    pub path: PathBuf,
    pub written: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct StackWriter {
    shared: Arc<CameraShared>,
    source: Source,
    sink: Box<dyn FrameSink>,
    filters: FilterPipeline,
    policy: RecordType,
    cancel: Arc<AtomicBool>,
    poll: Duration,
}

impl StackWriter {
    pub fn new(
        shared: Arc<CameraShared>,
        source: Source,
        sink: Box<dyn FrameSink>,
        policy: RecordType,
        cancel: Arc<AtomicBool>,
        poll: Duration,
    ) -> Self {
        Self {
            shared,
            source,
            sink,
            filters: FilterPipeline::default(),
            policy,
            cancel,
            poll,
        }
    }

    pub fn with_filters(mut self, filters: FilterPipeline) -> Self {
        self.filters = filters;
        self
    }

    fn buffer(&self) -> &FrameBuffer {
        match self.source {
            Source::Recording => &self.shared.recording,
            Source::Processing => &self.shared.processing,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn write_one(&mut self, frame: Frame) -> Result<()> {
        let frame = if self.filters.is_empty() {
            frame
        } else {
            self.filters.apply(frame)?
        };
        self.sink.write(&frame)
    }

    /// Drain until the session policy says stop, then close the sink
    #[instrument(skip(self), fields(camera = %self.shared.key, path = %self.sink.path().display()))]
    pub fn run(mut self) -> WriterReport {
        let written_total = counter!("livestack_frames_written_total", "camera" => self.shared.key.clone());
        let failed_total = counter!("livestack_write_failures_total", "camera" => self.shared.key.clone());

        while self.buffer().is_empty() && !self.buffer().is_closed() && !self.cancelled() {
            thread::sleep(self.poll);
        }

        let mut written = 0;
        let mut failed = 0;
        let mut cancelled = false;
        loop {
            if self.cancelled() {
                cancelled = true;
                break;
            }
            // Closed before popping: the producer can no longer add, so an
            // empty pop means every captured frame was taken
            let closed = self.buffer().is_closed();
            if closed && self.policy == RecordType::Toggled {
                break;
            }
            match self.buffer().pop_oldest() {
                Some(frame) => {
                    let sequence = frame.sequence();
                    match self.write_one(frame) {
                        Ok(()) => {
                            written += 1;
                            written_total.increment(1);
                        }
                        Err(e) => {
                            error!(sequence, "Failed to write frame: {}", e);
                            failed += 1;
                            failed_total.increment(1);
                        }
                    }
                }
                None if closed => break,
                None => thread::sleep(self.poll),
            }
        }

        if let Err(e) = self.sink.close() {
            error!("Failed to close stack: {}", e);
        }
        if cancelled {
            warn!(written, "Writer cancelled");
        } else {
            info!(written, failed, "Stack closed");
        }

        WriterReport {
            path: self.sink.path().to_path_buf(),
            written,
            failed,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelFormat, Roi};
    use crate::error::Error;
    use crate::CaptureConfig;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct Log {
        frames: Arc<Mutex<Vec<u64>>>,
        closed: Arc<AtomicBool>,
    }

    struct TestSink {
        path: PathBuf,
        log: Log,
        fail_on: Option<u64>,
    }

    impl FrameSink for TestSink {
        fn path(&self) -> &Path {
            &self.path
        }

        fn write(&mut self, frame: &Frame) -> Result<()> {
            if self.fail_on == Some(frame.sequence()) {
                return Err(Error::Device("disk hiccup".into()));
            }
            self.log.frames.lock().unwrap().push(frame.sequence());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.log.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![seq as u8; 16], seq, 4, 4, PixelFormat::Mono8).unwrap()
    }

    fn setup(frames: u64) -> Arc<CameraShared> {
        let shared = Arc::new(CameraShared::new(
            "cam",
            &Roi::full(4, 4),
            &CaptureConfig::default(),
            100,
        ));
        shared.recording.configure(true, 100, 0);
        for seq in 0..frames {
            shared.recording.add_frame(frame(seq));
        }
        shared.recording.close();
        shared
    }

    fn writer(shared: &Arc<CameraShared>, policy: RecordType, log: &Log, fail_on: Option<u64>) -> StackWriter {
        let sink = TestSink {
            path: PathBuf::from("cam_test.tif"),
            log: log.clone(),
            fail_on,
        };
        StackWriter::new(
            shared.clone(),
            Source::Recording,
            Box::new(sink),
            policy,
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn drains_buffer_after_stop() {
        let shared = setup(20);
        let log = Log::default();
        let report = writer(&shared, RecordType::FixedCount, &log, None).run();

        assert_eq!(report.written, 20);
        assert!(!report.cancelled);
        assert_eq!(*log.frames.lock().unwrap(), (0..20).collect::<Vec<_>>());
        assert!(log.closed.load(Ordering::SeqCst));
        assert!(shared.recording.is_empty());
    }

    #[test]
    fn toggled_stop_skips_drain() {
        let shared = setup(20);
        let log = Log::default();
        let report = writer(&shared, RecordType::Toggled, &log, None).run();

        assert_eq!(report.written, 0);
        assert_eq!(shared.recording.len(), 20);
        assert!(log.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn bad_frame_does_not_abort_stack() {
        let shared = setup(5);
        let log = Log::default();
        let report = writer(&shared, RecordType::FixedDuration, &log, Some(2)).run();

        assert_eq!((report.written, report.failed), (4, 1));
        assert_eq!(*log.frames.lock().unwrap(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn filters_run_before_sink() {
        let shared = setup(1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        struct PixelSink(PathBuf, Arc<Mutex<Vec<u8>>>);
        impl FrameSink for PixelSink {
            fn path(&self) -> &Path {
                &self.0
            }
            fn write(&mut self, frame: &Frame) -> Result<()> {
                self.1.lock().unwrap().extend_from_slice(&frame.data);
                Ok(())
            }
            fn close(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let report = StackWriter::new(
            shared,
            Source::Recording,
            Box::new(PixelSink("p.tif".into(), seen.clone())),
            RecordType::FixedCount,
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(1),
        )
        .with_filters(FilterPipeline::from_names(&["invert"]).unwrap())
        .run();

        assert_eq!(report.written, 1);
        assert!(seen.lock().unwrap().iter().all(|&px| px == 255));
    }

    #[test]
    fn waits_for_first_frame_then_follows_producer() {
        let shared = setup(0);
        shared.recording.configure(true, 100, 0);
        shared.set_recording(true);
        let log = Log::default();
        let handle = {
            let w = writer(&shared, RecordType::FixedCount, &log, None);
            thread::spawn(move || w.run())
        };

        for seq in 0..10 {
            shared.recording.add_frame(frame(seq));
            thread::sleep(Duration::from_millis(2));
        }
        shared.begin_draining();
        assert_eq!(shared.recording.add_frame(frame(99)), crate::pipeline::AddOutcome::Rejected);

        let report = handle.join().unwrap();
        assert_eq!(report.written, 10);
        assert_eq!(*log.frames.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn cancellation_closes_without_draining() {
        let shared = setup(10);
        shared.set_recording(true);
        let log = Log::default();
        let w = writer(&shared, RecordType::FixedCount, &log, None);
        w.cancel.store(true, Ordering::SeqCst);
        let report = w.run();

        assert!(report.cancelled);
        assert_eq!(report.written, 0);
        assert!(log.closed.load(Ordering::SeqCst));
    }
}
