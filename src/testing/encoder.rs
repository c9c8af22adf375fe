//! Simulated hardware encoder and muxer

use super::gpu::SimGpu;
use crate::errors::PipelineError;
use crate::recording::{
    BufferInfo, DequeueResult, EncoderFactory, EncoderFormat, HardwareEncoder, MediaFormat, Muxer, MuxerFactory,
    SampleFlags,
};
use crate::types::NativeWindow;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

const SAMPLE_BYTES: usize = 64;
const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40];
const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80];

/// Annex B slice NAL padded to `SAMPLE_BYTES`: IDR for key frames, else non-IDR
fn annex_b_slice(key_frame: bool, n: u64) -> Bytes {
    let mut data = vec![0, 0, 0, 1, if key_frame { 0x65 } else { 0x41 }];
    data.resize(SAMPLE_BYTES, 0x80 | (n % 64) as u8);
    Bytes::from(data)
}

/// One scripted encoder output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOutput {
    FormatChanged,
    BuffersChanged,
    Unexpected(i32),
    /// A buffer index the encoder does not hold
    MissingBuffer,
    Sample {
        data: Bytes,
        flags: SampleFlags,
        presentation_time_us: i64,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct EncoderState {
    started: bool,
    end_of_input: bool,
    pending: VecDeque<SimOutput>,
    held: HashMap<usize, Bytes>,
    next_index: usize,
    frames_queued: u64,
    released_buffers: usize,
    release_count: usize,
}

/// Test-side view of one created encoder
#[derive(Clone)]
pub struct SimEncoderHandle {
    format: EncoderFormat,
    window: NativeWindow,
    state: Arc<Mutex<EncoderState>>,
}

impl SimEncoderHandle {
    /// Emit one encoded frame, as if a frame had been rendered into the input window
    pub fn queue_frame(&self) {
        let mut state = lock(&self.state);
        if state.end_of_input {
            return;
        }

        let n = state.frames_queued;
        state.frames_queued += 1;

        let fps = self.format.frame_rate.max(1) as u64;
        let gop = (fps * self.format.i_frame_interval_secs as u64).max(1);
        let key_frame = n % gop == 0;
        state.pending.push_back(SimOutput::Sample {
            data: annex_b_slice(key_frame, n),
            flags: SampleFlags {
                key_frame,
                ..SampleFlags::default()
            },
            presentation_time_us: (n * 1_000_000 / fps) as i64,
        });
    }

    pub fn window(&self) -> NativeWindow {
        self.window
    }

    pub fn frames_queued(&self) -> u64 {
        lock(&self.state).frames_queued
    }

    /// Output buffers handed back with `release_output_buffer`
    pub fn released_buffers(&self) -> usize {
        lock(&self.state).released_buffers
    }

    pub fn release_count(&self) -> usize {
        lock(&self.state).release_count
    }

    pub fn is_started(&self) -> bool {
        lock(&self.state).started
    }
}

#[derive(Default)]
struct FactoryState {
    created: Vec<SimEncoderHandle>,
}

/// [`EncoderFactory`] whose encoders turn every frame swapped into their
/// input window into one 64-byte sample
pub struct SimEncoderFactory {
    gpu: Arc<SimGpu>,
    codec_config: bool,
    format_change: bool,
    script: Vec<SimOutput>,
    failing: bool,
    state: Mutex<FactoryState>,
}

impl SimEncoderFactory {
    pub fn new(gpu: Arc<SimGpu>) -> Self {
        Self {
            gpu,
            codec_config: false,
            format_change: true,
            script: Vec::new(),
            failing: false,
            state: Mutex::new(FactoryState::default()),
        }
    }

    /// Emit an in-band codec config buffer right after the format change
    pub fn with_codec_config(mut self) -> Self {
        self.codec_config = true;
        self
    }

    /// Never report the output format
    pub fn without_format_change(mut self) -> Self {
        self.format_change = false;
        self
    }

    /// Outputs emitted after start, ahead of any frame
    pub fn with_script(mut self, script: Vec<SimOutput>) -> Self {
        self.script = script;
        self
    }

    /// Make `create` fail
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Most recently created encoder
    pub fn last(&self) -> Option<SimEncoderHandle> {
        lock(&self.state).created.last().cloned()
    }

    pub fn created_count(&self) -> usize {
        lock(&self.state).created.len()
    }
}

impl EncoderFactory for SimEncoderFactory {
    fn create(&self, format: &EncoderFormat) -> Result<Box<dyn HardwareEncoder>, PipelineError> {
        if self.failing {
            return Err(PipelineError::Encoder(format!("no encoder for {}", format.mime)));
        }

        let window = self.gpu.allocate_window();
        let state = Arc::new(Mutex::new(EncoderState::default()));
        let handle = SimEncoderHandle {
            format: format.clone(),
            window,
            state: state.clone(),
        };

        let weak: Weak<Mutex<EncoderState>> = Arc::downgrade(&state);
        let sink_format = format.clone();
        self.gpu.register_window_sink(
            window,
            Arc::new(move || {
                if let Some(state) = weak.upgrade() {
                    SimEncoderHandle {
                        format: sink_format.clone(),
                        window,
                        state,
                    }
                    .queue_frame();
                }
            }),
        );

        lock(&self.state).created.push(handle);

        let mut startup = VecDeque::new();
        if self.format_change {
            startup.push_back(SimOutput::FormatChanged);
        }
        if self.codec_config {
            let mut csd = SPS.to_vec();
            csd.extend_from_slice(PPS);
            startup.push_back(SimOutput::Sample {
                data: Bytes::from(csd),
                flags: SampleFlags {
                    codec_config: true,
                    ..SampleFlags::default()
                },
                presentation_time_us: 0,
            });
        }
        startup.extend(self.script.iter().cloned());

        Ok(Box::new(SimEncoder {
            gpu: self.gpu.clone(),
            format: format.clone(),
            window,
            state,
            startup,
        }))
    }
}

struct SimEncoder {
    gpu: Arc<SimGpu>,
    format: EncoderFormat,
    window: NativeWindow,
    state: Arc<Mutex<EncoderState>>,
    startup: VecDeque<SimOutput>,
}

impl HardwareEncoder for SimEncoder {
    fn input_window(&self) -> NativeWindow {
        self.window
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        let mut state = lock(&self.state);
        if state.started {
            return Err(PipelineError::Encoder("encoder already started".to_string()));
        }
        state.started = true;
        // Startup outputs come before anything queued by early frames
        for output in self.startup.drain(..).rev() {
            state.pending.push_front(output);
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), PipelineError> {
        let mut state = lock(&self.state);
        if !state.started {
            return Err(PipelineError::Encoder("encoder not started".to_string()));
        }
        if !state.end_of_input {
            state.end_of_input = true;
            state.pending.push_back(SimOutput::Sample {
                data: Bytes::new(),
                flags: SampleFlags {
                    end_of_stream: true,
                    ..SampleFlags::default()
                },
                presentation_time_us: 0,
            });
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<DequeueResult, PipelineError> {
        let mut state = lock(&self.state);
        if !state.started {
            return Err(PipelineError::Encoder("dequeue before start".to_string()));
        }

        let result = match state.pending.pop_front() {
            None => DequeueResult::TryAgainLater,
            Some(SimOutput::FormatChanged) => DequeueResult::FormatChanged,
            Some(SimOutput::BuffersChanged) => DequeueResult::OutputBuffersChanged,
            Some(SimOutput::Unexpected(status)) => DequeueResult::Unexpected(status),
            Some(SimOutput::MissingBuffer) => DequeueResult::Buffer {
                index: usize::MAX,
                info: BufferInfo {
                    size: SAMPLE_BYTES,
                    ..BufferInfo::default()
                },
            },
            Some(SimOutput::Sample {
                data,
                flags,
                presentation_time_us,
            }) => {
                let index = state.next_index;
                state.next_index += 1;
                let info = BufferInfo {
                    offset: 0,
                    size: data.len(),
                    presentation_time_us,
                    flags,
                };
                state.held.insert(index, data);
                DequeueResult::Buffer { index, info }
            }
        };
        Ok(result)
    }

    fn output_format(&self) -> Result<MediaFormat, PipelineError> {
        Ok(MediaFormat {
            mime: self.format.mime.clone(),
            size: self.format.size,
            codec_specific_data: vec![Bytes::from_static(SPS), Bytes::from_static(PPS)],
        })
    }

    fn output_buffer(&self, index: usize) -> Option<Bytes> {
        lock(&self.state).held.get(&index).cloned()
    }

    fn release_output_buffer(&mut self, index: usize) {
        let mut state = lock(&self.state);
        if state.held.remove(&index).is_some() {
            state.released_buffers += 1;
        }
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        lock(&self.state).started = false;
        Ok(())
    }

    fn release(&mut self) {
        self.gpu.unregister_window_sink(self.window);
        let mut state = lock(&self.state);
        state.release_count += 1;
        state.pending.clear();
        state.held.clear();
    }
}

/// What the simulated muxers were asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxerLog {
    pub paths: Vec<PathBuf>,
    pub tracks: usize,
    pub started: bool,
    pub samples: usize,
    pub key_frames: usize,
    pub bytes: usize,
    pub stopped: bool,
    pub released: bool,
}

/// [`MuxerFactory`] that writes raw sample bytes to the output file
#[derive(Default)]
pub struct SimMuxerFactory {
    log: Arc<Mutex<MuxerLog>>,
}

impl SimMuxerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MuxerLog {
        lock(&self.log).clone()
    }
}

impl MuxerFactory for SimMuxerFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, PipelineError> {
        let file = File::create(path)?;
        {
            let mut log = lock(&self.log);
            log.paths.push(path.to_path_buf());
            log.stopped = false;
            log.released = false;
        }
        Ok(Box::new(SimMuxer {
            file: Some(file),
            log: self.log.clone(),
            tracks: 0,
            started: false,
        }))
    }
}

struct SimMuxer {
    file: Option<File>,
    log: Arc<Mutex<MuxerLog>>,
    tracks: usize,
    started: bool,
}

impl Muxer for SimMuxer {
    fn add_track(&mut self, _format: &MediaFormat) -> Result<usize, PipelineError> {
        if self.started {
            return Err(PipelineError::Muxer("track added after start".to_string()));
        }
        let track = self.tracks;
        self.tracks += 1;
        lock(&self.log).tracks += 1;
        Ok(track)
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        if self.tracks == 0 {
            return Err(PipelineError::Muxer("no tracks".to_string()));
        }
        self.started = true;
        lock(&self.log).started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<(), PipelineError> {
        if !self.started || track >= self.tracks {
            return Err(PipelineError::Muxer(format!("cannot write to track {}", track)));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| PipelineError::Muxer("muxer released".to_string()))?;
        file.write_all(data)?;

        let mut log = lock(&self.log);
        log.samples += 1;
        log.bytes += data.len();
        if info.flags.key_frame {
            log.key_frames += 1;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        if !self.started {
            return Err(PipelineError::Muxer("stop before start".to_string()));
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        self.started = false;
        lock(&self.log).stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.file = None;
        lock(&self.log).released = true;
    }
}
