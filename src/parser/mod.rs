//! Streaming parser for GEO SOFT files (GSE family, GDS and GPL).
//!
//! The parse runs on a worker thread so that the caller can report progress and give up on a
//! cancelled parse. Successive parses on one [`SoftParser`] accumulate into the same
//! [`ParseResult`], which lets a GDS file be combined with the GSE family file it belongs to.

mod columns;
mod dispatch;
mod session;

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use flate2::read::GzDecoder;
use tracing::{debug, info};

pub use columns::ColumnRouter;

use crate::error::KiraError;
use crate::model::ParseResult;
use session::ParseSession;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared flag a caller sets to stop a running parse.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct SoftParser {
    result: ParseResult,
    router: ColumnRouter,
    platforms_only: bool,
    token: CancellationToken,
}

impl SoftParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only platform sections are read; everything else is skipped.
    pub fn with_platforms_only(mut self, platforms_only: bool) -> Self {
        self.platforms_only = platforms_only;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn result(&self) -> &ParseResult {
        &self.result
    }

    pub fn into_result(self) -> ParseResult {
        self.result
    }

    /// Parses a plain or gzip-compressed SOFT file.
    pub fn parse_path(&mut self, path: &Path) -> Result<(), KiraError> {
        let file = File::open(path)
            .map_err(|err| KiraError::Io(format!("{}: {err}", path.display())))?;
        debug!(path = %path.display(), "parsing SOFT file");
        let compressed = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        if compressed {
            self.parse(BufReader::new(GzDecoder::new(file)))
        } else {
            self.parse(BufReader::new(file))
        }
    }

    pub fn parse_str(&mut self, text: &str) -> Result<(), KiraError> {
        self.parse(Cursor::new(text.as_bytes().to_vec()))
    }

    /// Parses `reader` on a worker thread, logging progress every few seconds.
    ///
    /// A cancelled or failed parse leaves this parser with an empty result.
    pub fn parse<R>(&mut self, mut reader: R) -> Result<(), KiraError>
    where
        R: BufRead + Send + 'static,
    {
        let first = reader
            .fill_buf()
            .map_err(|err| KiraError::Io(err.to_string()))?;
        if first.is_empty() {
            return Err(KiraError::EmptyInput);
        }

        let mut session = ParseSession::new(
            std::mem::take(&mut self.result),
            std::mem::take(&mut self.router),
            self.platforms_only,
        );
        let token = self.token.clone();
        let progress = Arc::new(AtomicUsize::new(0));
        let worker_progress = Arc::clone(&progress);
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let outcome = session.run(reader, &token, &worker_progress);
            // the receiver is gone only when the caller gave up waiting
            let _ = tx.send((outcome, session));
        });

        loop {
            match rx.recv_timeout(PROGRESS_INTERVAL) {
                Ok((outcome, session)) => {
                    let _ = handle.join();
                    outcome?;
                    let (result, router) = session.into_parts();
                    self.result = result;
                    self.router = router;
                    info!("Done parsing.");
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {
                    info!("{} lines parsed.", progress.load(Ordering::Relaxed));
                    if self.token.is_cancelled() {
                        return Err(KiraError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = handle.join();
                    return Err(KiraError::Parse {
                        line: progress.load(Ordering::Relaxed),
                        message: "parser thread stopped unexpectedly".to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        let mut parser = SoftParser::new();
        assert_matches!(parser.parse_str(""), Err(KiraError::EmptyInput));
    }

    #[test]
    fn key_outside_section_is_fatal() {
        let mut parser = SoftParser::new();
        let err = parser.parse_str("\n!Sample_title = x\n").unwrap_err();
        assert_matches!(err, KiraError::Parse { line: 2, .. });
        assert!(parser.result().samples.is_empty());
    }

    #[test]
    fn platforms_only_skips_samples() {
        let text = "^PLATFORM = GPL1\n!Platform_title = chip\n^SAMPLE = GSM1\n!Sample_title = s1\n";
        let mut parser = SoftParser::new().with_platforms_only(true);
        parser.parse_str(text).unwrap();
        let result = parser.into_result();
        assert_eq!(result.platforms["GPL1"].title.as_deref(), Some("chip"));
        assert!(result.samples.is_empty());
    }
}
