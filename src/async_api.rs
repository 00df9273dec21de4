use crate::convert::{ConversionReport, Converter};
use crate::session::{CancelToken, Session};
use crate::{Engine, Error, Result, VideoConfig};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;

/// One conversion request
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: VideoConfig,
}

/// Result of a job together with its transcript, which is kept on failure too.
#[derive(Debug)]
pub struct JobOutcome {
    pub result: Result<ConversionReport>,
    pub transcript: Vec<String>,
}

enum Command {
    Convert(ConversionJob, oneshot::Sender<JobOutcome>),
    Close(oneshot::Sender<()>),
}

/// An async-friendly conversion handle backed by a dedicated worker thread.
///
/// The worker owns the blocking pipeline (browser, encoder process) and runs
/// jobs one at a time in submission order, so async callers never block the
/// runtime and the engine never has to cross threads.
#[derive(Clone)]
pub struct ConversionWorker {
    cmd_tx: Sender<Command>,
    current: Arc<Mutex<Option<CancelToken>>>,
}

impl ConversionWorker {
    /// Spawn a worker that converts with headless Chrome.
    #[cfg(feature = "cdp")]
    pub fn spawn(converter: Converter) -> Self {
        Self::spawn_with::<crate::cdp::CdpEngine>(converter)
    }

    /// Spawn a worker over any engine implementation.
    pub fn spawn_with<E: Engine + 'static>(converter: Converter) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let current: Arc<Mutex<Option<CancelToken>>> = Arc::new(Mutex::new(None));
        let worker_current = current.clone();

        thread::spawn(move || {
            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Convert(job, resp) => {
                        let mut session = Session::new();
                        if let Ok(mut slot) = worker_current.lock() {
                            *slot = Some(session.cancel_token());
                        }

                        log::info!("converting {} -> {}", job.input.display(), job.output.display());
                        let result = converter.convert::<E>(&job.input, &job.output, &job.config, &mut session);
                        if let Err(e) = &result {
                            log::error!("conversion of {} failed: {}", job.input.display(), e);
                        }

                        if let Ok(mut slot) = worker_current.lock() {
                            *slot = None;
                        }
                        let _ = resp.send(JobOutcome {
                            result,
                            transcript: session.lines().to_vec(),
                        });
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(());
                        break;
                    }
                }
            }
        });

        Self { cmd_tx, current }
    }

    /// Queue a conversion and wait for it to finish.
    pub async fn convert(&self, job: ConversionJob) -> Result<JobOutcome> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Convert(job, tx))
            .map_err(|_| Error::Other("Conversion worker has shut down".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Convert canceled: {}", e)))
    }

    /// Cancel the conversion that is currently running, if any.
    pub fn cancel(&self) -> bool {
        match self.current.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Shutdown the background worker once queued jobs have run.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))
    }
}
