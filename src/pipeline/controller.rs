//! Stream lifecycle and the consumer-facing read path

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{Decoder, DecoderFactory, StreamInfo};
use crate::error::{Error, InitializationError, Result, ValidationError};
use crate::pipeline::buffer::{Arrival, FrameBuffer};
use crate::pipeline::ingest::{self, IngestHandle};
use crate::pipeline::registry::ConsumerRegistry;
use crate::pipeline::{lock, PipelineState};
use crate::process::{dump, FrameParameters, PostProcessor, Tensor};
use crate::Config;

/// State shared with the ingestion thread
pub(crate) struct Shared {
    pub(crate) buffer: FrameBuffer,
    pub(crate) registry: ConsumerRegistry,
    state: Mutex<PipelineState>,
    failure: Mutex<Option<String>>,
}

impl Shared {
    /// Ingestion is over, for whatever reason. Wakes every blocked reader.
    pub(crate) fn finish(&self, result: Result<()>) {
        match result {
            Ok(()) => info!("Ingestion finished"),
            Err(e) => {
                error!("Ingestion failed: {e}");
                *lock(&self.failure) = Some(e.to_string());
            }
        }
        *lock(&self.state) = PipelineState::Stopped;
        self.registry.close();
        self.buffer.close();
    }
}

/// What a consumer gets back from [`TensorStream::read`]
#[derive(Debug, Clone)]
pub struct ReadOutput {
    pub tensor: Tensor,
    /// Index of the source picture, when requested
    pub index: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub written: u64,
    pub dropped: u64,
    pub lapsed: u64,
    pub reads: u64,
    pub consumers: usize,
}

/// One decoded stream served to any number of named consumers.
///
/// All methods take `&self`; share it behind an `Arc` to read from several
/// threads. Dropping it stops ingestion.
pub struct TensorStream {
    config: Config,
    factory: Arc<dyn DecoderFactory>,
    shared: Arc<Shared>,
    /// Opened by `initialize`, handed to the worker by `start`
    decoder: Mutex<Option<Box<dyn Decoder>>>,
    info: OnceCell<StreamInfo>,
    ingest: Mutex<Option<IngestHandle>>,
    reads: AtomicU64,
}

impl TensorStream {
    pub fn new(config: Config, factory: Arc<dyn DecoderFactory>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            buffer: FrameBuffer::new(config.buffer.size),
            registry: ConsumerRegistry::new(config.buffer.overflow_policy, config.buffer.overflow_wait()),
            state: Mutex::new(PipelineState::Uninitialized),
            failure: Mutex::new(None),
        });
        Ok(Self {
            config,
            factory,
            shared,
            decoder: Mutex::new(None),
            info: OnceCell::new(),
            ingest: Mutex::new(None),
            reads: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.shared.state)
    }

    /// Probed stream properties, once initialized
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.info.get().copied()
    }

    /// Wall-clock time between two frames at the stream framerate
    pub fn frame_interval(&self) -> Option<Duration> {
        self.info.get().map(StreamInfo::frame_interval)
    }

    /// Why ingestion stopped, if it failed
    pub fn failure(&self) -> Option<String> {
        lock(&self.shared.failure).clone()
    }

    /// Opens and probes the stream, retrying up to `stream.repeat_number` times.
    ///
    /// Each failed attempt drops its decoder before the next one starts.
    #[instrument(skip(self), fields(url = %self.config.stream.url))]
    pub fn initialize(&self) -> Result<StreamInfo> {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                PipelineState::Uninitialized => *state = PipelineState::Initializing,
                state => {
                    return Err(Error::InvalidState {
                        operation: "initialize",
                        state,
                    })
                }
            }
        }

        let opened = self.open_with_retry();
        let mut state = lock(&self.shared.state);
        match opened {
            // stopped while we were busy opening
            Ok(_) if *state == PipelineState::Stopped => Err(Error::Stopped),
            Ok((decoder, info)) => {
                *lock(&self.decoder) = Some(decoder);
                let info = *self.info.get_or_init(|| info);
                info!(
                    width = info.width,
                    height = info.height,
                    fps = info.fps(),
                    "Stream initialized"
                );
                Ok(info)
            }
            Err(e) => {
                if *state == PipelineState::Initializing {
                    *state = PipelineState::Uninitialized;
                }
                Err(e)
            }
        }
    }

    fn open_with_retry(&self) -> Result<(Box<dyn Decoder>, StreamInfo)> {
        let stream = &self.config.stream;
        let mut last = String::new();
        for attempt in 1..=stream.repeat_number {
            if attempt > 1 {
                thread::sleep(stream.retry_backoff());
                if self.state() == PipelineState::Stopped {
                    return Err(Error::Stopped);
                }
            }
            match self.open_once(&stream.url) {
                Ok(opened) => return Ok(opened),
                Err(Error::Initialization(e)) => {
                    warn!(attempt, attempts = stream.repeat_number, "Initialization attempt failed: {e}");
                    last = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }
        Err(InitializationError::Exhausted {
            url: stream.url.clone(),
            attempts: stream.repeat_number,
            last,
        }
        .into())
    }

    fn open_once(&self, url: &str) -> Result<(Box<dyn Decoder>, StreamInfo)> {
        let mut decoder = self.factory.open(url)?;
        let info = decoder.probe()?;

        if info.framerate_num == 0 || info.framerate_den == 0 {
            return Err(InitializationError::InvalidFramerate {
                url: url.to_string(),
                num: info.framerate_num,
                den: info.framerate_den,
            }
            .into());
        }
        let max = self.config.stream.max_framerate;
        if info.fps() > max as f64 {
            return Err(InitializationError::FramerateTooHigh {
                url: url.to_string(),
                fps: info.fps(),
                max,
            }
            .into());
        }
        if info.width == 0 || info.height == 0 {
            return Err(InitializationError::Probe {
                url: url.to_string(),
                reason: format!("empty frame size {}x{}", info.width, info.height),
            }
            .into());
        }
        if let Some(depth) = info.reorder_depth {
            let buffer_size = self.config.buffer.size;
            if buffer_size > depth {
                return Err(ValidationError::BufferExceedsReorderDepth { buffer_size, depth }.into());
            }
        }
        Ok((decoder, info))
    }

    /// Hands the opened stream to a background ingestion thread and returns.
    pub fn start(&self) -> Result<()> {
        let mut state = lock(&self.shared.state);
        let decoder = match *state {
            PipelineState::Initializing => lock(&self.decoder).take(),
            _ => None,
        };
        let Some(decoder) = decoder else {
            return Err(Error::InvalidState {
                operation: "start",
                state: *state,
            });
        };

        let pacing = if self.config.stream.realtime {
            self.frame_interval()
        } else {
            None
        };
        match ingest::spawn(decoder, self.shared.clone(), pacing, self.config.buffer.poll_interval()) {
            Ok(handle) => {
                *lock(&self.ingest) = Some(handle);
                *state = PipelineState::Running;
                info!("Pipeline running");
                Ok(())
            }
            Err(e) => {
                *state = PipelineState::Stopped;
                drop(state);
                self.shared.registry.close();
                self.shared.buffer.close();
                Err(e)
            }
        }
    }

    /// Stops ingestion and waits for it, up to `buffer.stop_timeout_ms`.
    ///
    /// Safe to call any number of times, from any state.
    pub fn stop(&self) {
        let (previous, handle) = {
            let mut state = lock(&self.shared.state);
            let previous = *state;
            *state = PipelineState::Stopped;
            (previous, lock(&self.ingest).take())
        };
        if previous == PipelineState::Stopped && handle.is_none() {
            return;
        }

        // a stream opened but never started
        lock(&self.decoder).take();
        // releases a write parked on a lagging consumer before joining
        self.shared.registry.close();
        self.shared.buffer.close();
        if let Some(mut handle) = handle {
            handle.shutdown(self.config.buffer.stop_timeout());
        }
        info!(?previous, "Pipeline stopped");
    }

    /// Post-processes the frame `delay` pictures before the newest one for consumer `name`.
    ///
    /// Returns without waiting on the decoder. With `buffer.wait_for_fresh`
    /// turned on it instead blocks until a picture newer than the one this
    /// consumer last saw has been decoded.
    #[instrument(skip(self, params), fields(consumer = name))]
    pub fn read(&self, name: &str, delay: i32, params: &FrameParameters, return_index: bool) -> Result<ReadOutput> {
        let started = Instant::now();
        params.validate()?;
        ConsumerRegistry::validate_delay(name, delay)?;
        match self.state() {
            PipelineState::Running => {}
            PipelineState::Stopped => return Err(Error::Stopped),
            state => {
                return Err(Error::InvalidState {
                    operation: "read",
                    state,
                })
            }
        }

        if self.config.buffer.wait_for_fresh {
            let timeout = self.config.buffer.read_timeout();
            let seen = self.shared.registry.last_head(name);
            match self.shared.buffer.wait_for_head_beyond(seen, timeout) {
                Arrival::Ready(_) => {}
                Arrival::Closed => return Err(Error::Stopped),
                Arrival::TimedOut => {
                    return Err(Error::Timeout {
                        consumer: name.to_string(),
                        waited: timeout,
                    })
                }
            }
        }

        let resolved = self.shared.registry.resolve(name, delay, &self.shared.buffer)?;
        let tensor = PostProcessor::process(&resolved.picture, params)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        metrics::histogram!("read_latency_us").record(started.elapsed().as_micros() as f64);
        debug!(index = resolved.index, head = resolved.head, "Frame served");

        Ok(ReadOutput {
            tensor,
            index: return_index.then_some(resolved.index),
        })
    }

    /// Writes a tensor produced with `params` under `dump.dir`
    pub fn dump(&self, tensor: &Tensor, name: &str, params: &FrameParameters) -> Result<PathBuf> {
        dump::dump(tensor, name, params, &self.config.dump)
    }

    pub fn stats(&self) -> PipelineStats {
        let (written, dropped) = self.shared.buffer.stats();
        PipelineStats {
            written,
            dropped,
            lapsed: self.shared.registry.lapses(),
            reads: self.reads.load(Ordering::Relaxed),
            consumers: self.shared.registry.len(),
        }
    }
}

impl Drop for TensorStream {
    fn drop(&mut self) {
        self.stop();
    }
}
