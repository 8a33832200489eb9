//! Background ingestion: a decode worker feeding a single buffer writer

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Selector, Sender};
use tracing::{debug, error, info, warn};

use crate::capture::{DecodedPicture, Decoder, Picture, StopToken};
use crate::error::{DecodeError, Error};
use crate::pipeline::controller::Shared;

type Pulled = Result<Option<DecodedPicture>, DecodeError>;

enum Event {
    Pulled(Pulled),
    WorkerGone,
    Stop,
}

/// Owner's side of a running ingestion loop
pub(crate) struct IngestHandle {
    stop: StopToken,
    /// Dropped to wake the loop out of any wait
    stop_tx: Option<Sender<()>>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl IngestHandle {
    /// Signals the loop and waits up to `timeout` for it to exit.
    ///
    /// Returns false when the thread had to be detached. The decode worker is
    /// never joined: a decoder stuck inside `pull` is abandoned and cleans up
    /// whenever its call returns.
    pub(crate) fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop.stop();
        self.stop_tx.take();
        let Some(thread) = self.thread.take() else {
            return true;
        };
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("Ingestion thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "Ingestion thread did not exit in time, detaching it");
                false
            }
        }
    }
}

/// Launches the decode worker and the ingestion loop, returning immediately.
pub(crate) fn spawn(
    decoder: Box<dyn Decoder>,
    shared: Arc<Shared>,
    pacing: Option<Duration>,
    poll_interval: Duration,
) -> Result<IngestHandle, Error> {
    let stop = StopToken::new();
    // One picture in flight: the worker decodes ahead by at most one frame.
    let (picture_tx, picture_rx) = flume::bounded::<Pulled>(1);

    thread::Builder::new()
        .name("decode-worker".into())
        .spawn({
            let stop = stop.clone();
            move || decode_worker(decoder, picture_tx, stop)
        })
        .map_err(|source| Error::Spawn {
            name: "decode-worker",
            source,
        })?;

    let (stop_tx, stop_rx) = flume::bounded::<()>(1);
    let (done_tx, done_rx) = flume::bounded::<()>(1);
    let thread = thread::Builder::new()
        .name("ingest".into())
        .spawn({
            let stop = stop.clone();
            move || {
                let result = ingest_loop(&shared, &picture_rx, &stop_rx, &stop, pacing, poll_interval);
                shared.finish(result);
                // shutdown may have stopped listening after its timeout
                let _ = done_tx.send(());
            }
        });
    let thread = match thread {
        Ok(thread) => thread,
        Err(source) => {
            // the worker exits once its receiver is gone
            stop.stop();
            return Err(Error::Spawn {
                name: "ingest",
                source,
            });
        }
    };

    Ok(IngestHandle {
        stop,
        stop_tx: Some(stop_tx),
        done: done_rx,
        thread: Some(thread),
    })
}

fn decode_worker(mut decoder: Box<dyn Decoder>, pictures: Sender<Pulled>, stop: StopToken) {
    while !stop.is_stopped() {
        let pulled = decoder.pull(&stop);
        let last = !matches!(pulled, Ok(Some(_)));
        if pictures.send(pulled).is_err() || last {
            break;
        }
    }
    debug!("Decode worker exiting");
}

fn ingest_loop(
    shared: &Shared,
    pictures: &Receiver<Pulled>,
    stop_rx: &Receiver<()>,
    stop: &StopToken,
    pacing: Option<Duration>,
    poll_interval: Duration,
) -> Result<(), Error> {
    info!(?pacing, "Ingestion started");
    let mut next_index = 0u64;
    let mut released: Option<Instant> = None;

    loop {
        if stop.is_stopped() {
            return Ok(());
        }
        let event = Selector::new()
            .recv(pictures, |pulled| match pulled {
                Ok(pulled) => Event::Pulled(pulled),
                Err(_) => Event::WorkerGone,
            })
            .recv(stop_rx, |_| Event::Stop)
            .wait_timeout(poll_interval);

        let decoded = match event {
            Err(_) => continue,
            Ok(Event::Stop) => return Ok(()),
            Ok(Event::WorkerGone) => return Err(DecodeError::WorkerLost.into()),
            Ok(Event::Pulled(Ok(None))) => {
                info!(frames = next_index, "End of stream");
                return Ok(());
            }
            Ok(Event::Pulled(Err(e))) => return Err(e.into()),
            Ok(Event::Pulled(Ok(Some(decoded)))) => decoded,
        };

        let picture = Picture::from_decoded(next_index, decoded)?;
        shared.buffer.write(picture, &shared.registry)?;
        next_index += 1;

        if let Some(interval) = pacing {
            let now = Instant::now();
            // late frames reset the schedule instead of bursting to catch up
            let due = released.map_or(now, |at| (at + interval).max(now));
            if due > now {
                match stop_rx.recv_timeout(due - now) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return Ok(()),
                }
            }
            released = Some(due);
        }
    }
}
