//! Shared fixtures for the recording tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use livestack::capture::{Camera, SimulatedCamera, SimulatedConfig};
use livestack::recording::{FrameSink, SinkFactory};
use livestack::{Config, Coordinator, FileFormat, Frame, RecordType, Result, SessionRequest};

/// What a memory sink saw
#[derive(Debug, Default, Clone)]
pub struct StackLog {
    pub sequences: Vec<u64>,
    pub closed: bool,
}

pub type Stacks = Arc<Mutex<HashMap<PathBuf, StackLog>>>;

/// Keeps every stack in memory, keyed by output path
#[derive(Default)]
pub struct MemorySinks {
    pub stacks: Stacks,
    pub rejected: Vec<FileFormat>,
}

struct MemorySink {
    path: PathBuf,
    stacks: Stacks,
}

impl FrameSink for MemorySink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let mut stacks = self.stacks.lock().unwrap();
        let log = stacks.entry(self.path.clone()).or_default();
        assert!(!log.closed, "write after close");
        log.sequences.push(frame.sequence());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stacks
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .closed = true;
        Ok(())
    }
}

impl SinkFactory for MemorySinks {
    fn supports(&self, format: FileFormat) -> bool {
        !self.rejected.contains(&format)
    }

    fn open(&self, path: &Path, _: FileFormat, _: Option<usize>) -> Result<Box<dyn FrameSink>> {
        self.stacks
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), StackLog::default());
        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            stacks: self.stacks.clone(),
        }))
    }
}

pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.cameras.clear();
    config
}

pub fn memory_coordinator() -> (Coordinator, Stacks) {
    let sinks = MemorySinks::default();
    let stacks = sinks.stacks.clone();
    (Coordinator::new(quiet_config(), Arc::new(sinks)), stacks)
}

pub fn simulated(fps: f64) -> Box<dyn Camera> {
    Box::new(SimulatedCamera::new(
        "sim",
        SimulatedConfig {
            width: 32,
            height: 32,
            fps,
            ..Default::default()
        },
    ))
}

/// Camera that never delivers a frame
pub fn silent() -> Box<dyn Camera> {
    Box::new(SimulatedCamera::new(
        "silent",
        SimulatedConfig {
            width: 32,
            height: 32,
            miss_every: 1,
            ..Default::default()
        },
    ))
}

pub fn request(keys: &[&str], folder: &Path, record_type: RecordType) -> SessionRequest {
    SessionRequest {
        camera_keys: keys.iter().map(|k| k.to_string()).collect(),
        folder: folder.to_path_buf(),
        filename: "run".into(),
        file_format: FileFormat::Plain,
        record_type,
        stack_size: 10,
        acquisition_time: 0.5,
    }
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
