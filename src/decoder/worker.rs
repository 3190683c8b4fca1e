use super::codec::{QoiStreamDecoder, StreamCodec};
use super::config::{DecoderConfig, DrainOrder};
use super::error::{CodecError, Error, Result};
use super::header::{END_MARKER_SIZE, HEADER_SIZE};
use super::input::InputBuffer;
use super::progress::Cursor;
use super::{Descriptor, Task};
use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use std::fs::File;
use std::io::{self, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Lifecycle of the current task as seen from the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// No task, or the last `prepare` failed
    Idle,
    /// A file is loaded but `start` has not been called
    Prepared,
    Running,
    /// The worker is parked on behalf of a `get`/`pause` caller
    Paused,
    /// All input or all buffer space consumed (truncated files included)
    Completed,
    /// The codec rejected the stream
    Failed,
    /// Superseded by `cancel`/`prepare` or interrupted by `stop`
    Cancelled,
}

impl DecodeState {
    /// The worker will not touch the current task again
    pub const fn is_finished(self) -> bool {
        matches!(
            self,
            DecodeState::Completed | DecodeState::Failed | DecodeState::Cancelled
        )
    }
}

/// Rendezvous flags. Each flag has one setter and one clearer:
///
/// | flag               | set by   | cleared by |
/// |--------------------|----------|------------|
/// | `running`          | consumer | worker     |
/// | `pause_requested`  | consumer | consumer, or worker when the task ends |
/// | `paused`           | worker   | worker     |
/// | `cancel_requested` | consumer | worker     |
/// | `shutdown`         | consumer | never      |
struct Control {
    running: bool,
    pause_requested: bool,
    paused: bool,
    cancel_requested: bool,
    shutdown: bool,
    state: DecodeState,
}

struct Handshake {
    control: Mutex<Control>,
    signal: Condvar,
}

enum Signal {
    Continue,
    Cancel,
    Shutdown,
}

impl Handshake {
    fn new() -> Self {
        Self {
            control: Mutex::new(Control {
                running: false,
                pause_requested: false,
                paused: false,
                cancel_requested: false,
                shutdown: false,
                state: DecodeState::Idle,
            }),
            signal: Condvar::new(),
        }
    }

    fn state(&self) -> DecodeState {
        self.control.lock().state
    }

    fn set_state(&self, state: DecodeState) {
        self.control.lock().state = state;
    }

    /// Worker side: park until there is work. `false` means shut down.
    fn wait_for_run(&self) -> bool {
        let mut control = self.control.lock();
        while !control.running && !control.shutdown {
            self.signal.wait(&mut control);
        }
        !control.shutdown
    }

    /// Worker side: the current task is over, clear every request and wake waiters
    fn settle(&self, state: Option<DecodeState>) {
        let mut control = self.control.lock();
        control.running = false;
        control.pause_requested = false;
        control.paused = false;
        control.cancel_requested = false;
        if let Some(state) = state {
            control.state = state;
        }
        self.signal.notify_all();
    }

    /// Consumer side: park a running worker. Returns whether it has to be released.
    fn request_pause(&self) -> bool {
        let mut control = self.control.lock();
        if !control.running {
            return false;
        }

        log::debug!("Requesting pause");
        control.pause_requested = true;
        self.signal.notify_all();
        // a worker that finishes instead of parking clears the request itself
        while control.pause_requested && !control.paused {
            self.signal.wait(&mut control);
        }
        if control.paused {
            control.state = DecodeState::Paused;
        }
        control.paused
    }

    fn release_pause(&self) {
        let mut control = self.control.lock();
        control.pause_requested = false;
        // the worker is still parked but will run on, report that right away
        if control.paused && !control.shutdown {
            control.state = DecodeState::Running;
        }
        self.signal.notify_all();
    }

    /// Consumer side: abort a running task and wait for the acknowledgement
    fn request_cancel(&self) -> bool {
        let mut control = self.control.lock();
        if !control.running {
            return false;
        }

        log::debug!("Requesting cancel");
        control.cancel_requested = true;
        self.signal.notify_all();
        while control.cancel_requested {
            self.signal.wait(&mut control);
        }
        true
    }
}

/// Destination pixels plus the worker's progress through them
pub(crate) struct Frame {
    pixels: Vec<u8>,
    offset_out: usize,
    offset_in: u64,
}

/// Encoded input of a task, normally the opened file
pub(crate) type Reader = Box<dyn Read + Send>;

/// The open file of the current task
struct Source {
    path: PathBuf,
    reader: Reader,
    /// Encoded pixel stream size, header and end marker excluded
    stream_size: u64,
    read: u64,
}

enum Outcome {
    /// `start` without a loaded file
    Idle,
    Finished,
    Failed(CodecError),
    Cancelled,
    Shutdown,
}

enum Step {
    More,
    Done,
}

struct Job<C> {
    codec: C,
    source: Option<Source>,
    input: InputBuffer,
    frame: Frame,
}

impl<C: StreamCodec> Job<C> {
    fn new(codec: C, chunk_size: usize) -> Self {
        Self {
            codec,
            source: None,
            input: InputBuffer::with_capacity(chunk_size),
            frame: Frame {
                pixels: Vec::new(),
                offset_out: 0,
                offset_in: 0,
            },
        }
    }

    /// Read the header from `reader` and reset every offset for a new task
    ///
    /// `size` is the total input length, header and end marker included.
    fn load(&mut self, path: &Path, mut reader: Reader, size: u64, config: &DecoderConfig) -> Result<Descriptor> {
        self.source = None;
        self.input.clear();
        self.frame.offset_out = 0;
        self.frame.offset_in = 0;

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).map_err(|e| Error::io(path, e))?;

        self.codec.reset();
        let desc = self
            .codec
            .initialize(&header, config.requested_channels, &config.limits)
            .map_err(|e| match e {
                CodecError::Header(header) => Error::InvalidHeader(header),
                other => Error::Codec(other),
            })?;

        self.frame.pixels.clear();
        self.frame.pixels.resize(desc.buffer_size(), 0);

        self.source = Some(Source {
            path: path.to_path_buf(),
            reader,
            stream_size: size.saturating_sub((HEADER_SIZE + END_MARKER_SIZE) as u64),
            read: 0,
        });

        Ok(desc)
    }

    fn discard(&mut self) {
        self.source = None;
        self.input.clear();
        self.frame.pixels.clear();
        self.frame.offset_out = 0;
        self.frame.offset_in = 0;
    }

    /// One chunk iteration: read, then feed the codec until it stalls
    fn step(&mut self) -> std::result::Result<Step, CodecError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(Step::Done);
        };
        if self.frame.offset_out >= self.frame.pixels.len() || self.frame.offset_in >= source.stream_size {
            return Ok(Step::Done);
        }

        let stream_size = source.stream_size;
        let remaining = stream_size - source.read;
        let limit = usize::try_from(remaining).unwrap_or(usize::MAX);
        let read = match self.input.fill_from(&mut source.reader, limit) {
            Ok(read) => read,
            Err(e) => {
                log::warn!("Read failed on {}: {}", source.path.display(), e);
                return Ok(Step::Done);
            }
        };
        source.read += read as u64;

        if read == 0 {
            // end of file, or only a torn opcode left
            return Ok(Step::Done);
        }

        self.feed()?;

        log::debug!(
            "Chunk of {} bytes, offset_out {}/{}, offset_in {}/{}",
            read,
            self.frame.offset_out,
            self.frame.pixels.len(),
            self.frame.offset_in,
            stream_size
        );

        Ok(Step::More)
    }

    fn feed(&mut self) -> std::result::Result<(), CodecError> {
        while !self.input.is_empty() {
            let progress = self
                .codec
                .decode(&mut self.frame.pixels[self.frame.offset_out..], self.input.pending())?;

            self.frame.offset_out += progress.written;
            self.frame.offset_in += progress.processed as u64;
            self.input.consume(progress.processed);

            if progress.processed == 0 {
                // leftover stays staged for the next read
                break;
            }
        }
        Ok(())
    }

    /// Flush a run the codec is still holding
    fn drain(&mut self) {
        while self.codec.has_run_count() {
            let written = self.codec.drain_run(&mut self.frame.pixels[self.frame.offset_out..]);
            if written == 0 {
                break;
            }
            self.frame.offset_out += written;
        }
    }

    /// Close the task and map the outcome to the state the consumer will see
    fn finish(&mut self, outcome: Outcome, drain_order: DrainOrder, started: Instant) -> Option<DecodeState> {
        let path = self
            .source
            .as_ref()
            .map(|source| source.path.display().to_string())
            .unwrap_or_default();

        let state = match outcome {
            Outcome::Idle => return None,
            Outcome::Finished => {
                self.drain();
                if self.frame.offset_out < self.frame.pixels.len() {
                    log::warn!(
                        "Stream of {} ended early, decoded {} of {} bytes",
                        path,
                        self.frame.offset_out,
                        self.frame.pixels.len()
                    );
                } else {
                    log::info!("Decoded {} in {:?}", path, started.elapsed());
                }
                DecodeState::Completed
            }
            Outcome::Failed(e) => {
                log::error!(
                    "Decode of {} failed after {} input bytes: {}",
                    path,
                    self.frame.offset_in,
                    e
                );
                DecodeState::Failed
            }
            Outcome::Cancelled | Outcome::Shutdown => {
                if drain_order == DrainOrder::BeforeCancel {
                    self.drain();
                }
                log::debug!("Decode of {} cancelled at {} bytes", path, self.frame.offset_out);
                DecodeState::Cancelled
            }
        };

        self.source = None;
        self.input.clear();
        Some(state)
    }
}

struct Shared<C> {
    handshake: Handshake,
    job: Mutex<Job<C>>,
    config: DecoderConfig,
}

impl<C: StreamCodec> Shared<C> {
    fn run(&self) {
        log::debug!("Decode worker started");

        while self.handshake.wait_for_run() {
            let mut job = self.job.lock();
            let started = Instant::now();
            let outcome = self.pump(&mut job);
            let state = job.finish(outcome, self.config.drain_order, started);
            self.handshake.settle(state);
        }

        self.handshake.settle(None);
        log::debug!("Decode worker stopped");
    }

    fn pump(&self, job: &mut MutexGuard<'_, Job<C>>) -> Outcome {
        match job.source.as_ref() {
            Some(source) => log::info!("Running on file: {}", source.path.display()),
            None => return Outcome::Idle,
        }

        loop {
            match self.checkpoint(job) {
                Signal::Continue => {}
                Signal::Cancel => return Outcome::Cancelled,
                Signal::Shutdown => return Outcome::Shutdown,
            }

            match job.step() {
                Ok(Step::More) => {}
                Ok(Step::Done) => return Outcome::Finished,
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    /// Iteration boundary: honor a pause, then a cancel, then a shutdown
    fn checkpoint(&self, job: &mut MutexGuard<'_, Job<C>>) -> Signal {
        let handshake = &self.handshake;

        if handshake.control.lock().pause_requested {
            // the consumer reads the frame while we wait, so let go of it
            MutexGuard::unlocked(job, || {
                let mut control = handshake.control.lock();
                control.paused = true;
                control.state = DecodeState::Paused;
                handshake.signal.notify_all();

                while control.pause_requested && !control.shutdown {
                    handshake.signal.wait(&mut control);
                }

                control.paused = false;
                control.state = DecodeState::Running;
            });
        }

        let control = handshake.control.lock();
        if control.cancel_requested {
            Signal::Cancel
        } else if control.shutdown {
            Signal::Shutdown
        } else {
            Signal::Continue
        }
    }

    fn pause(&self) -> Paused<'_> {
        let active = self.handshake.request_pause();
        let frame = MutexGuard::map(self.job.lock(), |job| &mut job.frame);
        Paused {
            frame,
            _release: Release {
                handshake: &self.handshake,
                active,
            },
        }
    }
}

/// Resumes the worker when dropped
struct Release<'a> {
    handshake: &'a Handshake,
    active: bool,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if self.active {
            self.handshake.release_pause();
        }
    }
}

/// Exclusive access to the pixel buffer while the worker is parked
///
/// Obtained from [`AsyncDecoder::pause`]. The worker resumes when this is
/// dropped.
pub struct Paused<'a> {
    // dropped before `_release` so the worker never waits on the frame lock
    frame: MappedMutexGuard<'a, Frame>,
    _release: Release<'a>,
}

impl Paused<'_> {
    /// The whole pixel buffer, decoded or not
    pub fn pixels(&self) -> &[u8] {
        &self.frame.pixels
    }

    /// Bytes written into the pixel buffer so far
    pub fn decoded_len(&self) -> usize {
        self.frame.offset_out
    }

    /// Encoded stream bytes consumed so far
    pub fn consumed(&self) -> u64 {
        self.frame.offset_in
    }
}

/// A range of rows that became available since the previous `get`
pub struct Work<'a> {
    paused: Paused<'a>,
    bytes: Range<usize>,
    /// First row in this batch
    pub start: usize,
    /// Number of rows in this batch
    pub count: usize,
}

impl Work<'_> {
    /// Pixels of rows `start..start + count`
    pub fn data(&self) -> &[u8] {
        &self.paused.pixels()[self.bytes.clone()]
    }

    pub fn rows(&self) -> Range<usize> {
        self.start..self.start + self.count
    }
}

/// Result of a successful [`AsyncDecoder::prepare`]
pub struct Preparation<'a> {
    pub desc: Descriptor,
    frame: MappedMutexGuard<'a, Frame>,
}

impl Preparation<'_> {
    /// The freshly zeroed pixel buffer the worker will decode into
    pub fn buffer(&self) -> &[u8] {
        &self.frame.pixels
    }
}

/// Decodes one QOI file at a time on a background thread
///
/// The consumer drives it from a single thread:
///
/// 1. [`prepare`](Self::prepare) loads a file, cancelling any decode in flight
/// 2. [`start`](Self::start) lets the worker run
/// 3. [`get`](Self::get) hands out newly completed rows, typically once per frame
/// 4. [`stop`](Self::stop) (or drop) joins the worker
pub struct AsyncDecoder<C: StreamCodec + Send + 'static = QoiStreamDecoder> {
    shared: Arc<Shared<C>>,
    thread: Option<JoinHandle<()>>,
    task: Option<Task>,
    cursor: Option<Cursor>,
}

impl AsyncDecoder<QoiStreamDecoder> {
    /// Spawn a worker with the built-in QOI codec
    pub fn new(config: DecoderConfig) -> io::Result<Self> {
        Self::with_codec(QoiStreamDecoder::new(), config)
    }
}

impl<C: StreamCodec + Send + 'static> AsyncDecoder<C> {
    /// Spawn a worker driving `codec`
    pub fn with_codec(codec: C, config: DecoderConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            handshake: Handshake::new(),
            job: Mutex::new(Job::new(codec, config.chunk_size())),
            config,
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("qoi-decoder".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            thread: Some(thread),
            task: None,
            cursor: None,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.shared.config
    }

    /// Load `path` as the new task without starting it
    ///
    /// A decode still in flight is cancelled first; this blocks until the
    /// worker has let go of the old buffer. On error the previous task is
    /// gone as well.
    pub fn prepare(&mut self, path: impl AsRef<Path>) -> Result<Preparation<'_>> {
        self.prepare_source(path.as_ref(), open_file)
    }

    /// `prepare` with the input supplied by `open` instead of the filesystem
    pub(crate) fn prepare_source<F>(&mut self, path: &Path, open: F) -> Result<Preparation<'_>>
    where
        F: FnOnce(&Path) -> io::Result<(Reader, u64)>,
    {
        self.cancel();

        self.task = None;
        self.cursor = None;

        let mut job = self.shared.job.lock();
        let loaded = open(path)
            .map_err(|e| Error::io(path, e))
            .and_then(|(reader, size)| job.load(path, reader, size, &self.shared.config));

        match loaded {
            Ok(desc) => {
                log::info!(
                    "Prepared {}: {}x{} {}",
                    path.display(),
                    desc.width,
                    desc.height,
                    desc.channels
                );
                self.task = Some(Task {
                    path: path.to_path_buf(),
                    desc,
                });
                self.cursor = Some(Cursor::new(&desc));
                self.shared.handshake.set_state(DecodeState::Prepared);

                Ok(Preparation {
                    desc,
                    frame: MutexGuard::map(job, |job| &mut job.frame),
                })
            }
            Err(e) => {
                log::warn!("Failed to prepare {}: {}", path.display(), e);
                job.discard();
                self.shared.handshake.set_state(DecodeState::Idle);
                Err(e)
            }
        }
    }

    /// Let the worker decode the prepared task. No-op when already running.
    pub fn start(&mut self) {
        if self.thread.is_none() {
            log::warn!("start() after stop() ignored");
            return;
        }

        let handshake = &self.shared.handshake;
        let mut control = handshake.control.lock();
        match control.state {
            DecodeState::Prepared => {
                control.running = true;
                control.state = DecodeState::Running;
                handshake.signal.notify_all();
            }
            DecodeState::Running | DecodeState::Paused => {}
            state => log::debug!("start() ignored in state {:?}", state),
        }
    }

    /// Rows completed since the last call, or `None` if there are none yet
    ///
    /// Pauses a running worker for the lifetime of the returned [`Work`]; the
    /// worker continues once it is dropped. Returns `None` without pausing
    /// once every row has been handed out.
    pub fn get(&mut self) -> Option<Work<'_>> {
        if self.cursor.as_ref().map_or(true, Cursor::is_done) {
            return None;
        }

        let paused = self.shared.pause();
        let cursor = self.cursor.as_mut()?;
        let rows = cursor.advance(paused.decoded_len())?;
        let bytes = cursor.byte_range(&rows);

        Some(Work {
            paused,
            bytes,
            start: rows.start,
            count: rows.len(),
        })
    }

    /// Park the worker and look at the whole buffer
    pub fn pause(&mut self) -> Paused<'_> {
        self.shared.pause()
    }

    /// Abort the running task, if any, and wait until the worker let go of it
    pub fn cancel(&mut self) {
        if self.shared.handshake.request_cancel() {
            if let Some(task) = &self.task {
                log::info!("Cancelled {}", task.path.display());
            }
        }
    }

    /// Join the worker. Nothing decodes after this.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        {
            let handshake = &self.shared.handshake;
            let mut control = handshake.control.lock();
            control.shutdown = true;
            handshake.signal.notify_all();
        }

        if thread.join().is_err() {
            log::error!("Decode worker panicked");
        }
    }

    pub fn current(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    pub fn state(&self) -> DecodeState {
        self.shared.handshake.state()
    }

    /// Rows already handed out by `get`
    pub fn rows_delivered(&self) -> usize {
        self.cursor.as_ref().map_or(0, Cursor::line_start)
    }
}

fn open_file(path: &Path) -> io::Result<(Reader, u64)> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    Ok((Box::new(file), size))
}

impl<C: StreamCodec + Send + 'static> Drop for AsyncDecoder<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
