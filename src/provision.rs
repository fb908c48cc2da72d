//! materializing many inputs at once
//!
//! every input gets its own worker thread; reports come back over one
//! channel and the orchestrator waits for exactly one report per input. the
//! first failure cancels the rest.

use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::hash::CommitId;
use crate::progress::CancelToken;
use crate::transmat::{Arena, MaterializeOptions, Transmat, TransmatKind};
use crate::warehouse::SiloUri;

/// how often the orchestrator looks at the caller's cancel token
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// one ware to materialize
#[derive(Clone, Debug)]
pub struct Input {
    pub kind: TransmatKind,
    pub id: CommitId,
    pub warehouses: Vec<SiloUri>,
}

impl Input {
    pub fn new(kind: impl Into<TransmatKind>, id: CommitId, warehouses: Vec<SiloUri>) -> Self {
        Self {
            kind: kind.into(),
            id,
            warehouses,
        }
    }
}

/// materialize every input in parallel, returning one result per input in
/// input order
///
/// when any input fails the remaining workers are cancelled, so their
/// results are usually `Cancelled`. cancelling `opts.cancel` cancels all
/// workers.
pub fn materialize_all(
    transmat: &dyn Transmat,
    inputs: &[Input],
    opts: &MaterializeOptions,
) -> Vec<Result<Arena>> {
    let local = CancelToken::new();
    let worker_opts = MaterializeOptions {
        cancel: local.clone(),
        ..opts.clone()
    };
    let mut results: Vec<Option<Result<Arena>>> = inputs.iter().map(|_| None).collect();

    thread::scope(|scope| {
        let (tx, rx) = channel::unbounded::<(usize, Result<Arena>)>();
        for (index, input) in inputs.iter().enumerate() {
            let tx = tx.clone();
            let worker_opts = &worker_opts;
            scope.spawn(move || {
                let result =
                    transmat.materialize(&input.kind, &input.id, &input.warehouses, worker_opts);
                // the receiver outlives every worker
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        let mut received = 0;
        while received < inputs.len() {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok((index, result)) => {
                    received += 1;
                    match &result {
                        Ok(arena) => {
                            debug!(id = %inputs[index].id, path = %arena.path().display(), "input ready")
                        }
                        Err(e) if !local.is_cancelled() => {
                            warn!(id = %inputs[index].id, error = %e, "input failed, cancelling the rest");
                            local.cancel();
                        }
                        Err(_) => {}
                    }
                    results[index] = Some(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if opts.cancel.is_cancelled() {
                        local.cancel();
                    }
                }
                // a worker died without reporting
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| Err(Error::Unknown("worker exited without reporting".into()))))
        .collect()
}

/// materialize every input, all or nothing
///
/// on failure the arenas that did succeed are torn down and the error that
/// caused the cancellation is returned.
pub fn provision(
    transmat: &dyn Transmat,
    inputs: &[Input],
    opts: &MaterializeOptions,
) -> Result<Vec<Arena>> {
    let mut arenas = Vec::with_capacity(inputs.len());
    let mut failure: Option<Error> = None;

    for result in materialize_all(transmat, inputs, opts) {
        match result {
            Ok(arena) => arenas.push(arena),
            Err(e) => {
                // prefer the root cause over the cancellations it triggered
                let replace = match &failure {
                    None => true,
                    Some(current) => {
                        current.kind() == ErrorKind::Cancelled && e.kind() != ErrorKind::Cancelled
                    }
                };
                if replace {
                    failure = Some(e);
                }
            }
        }
    }

    if let Some(e) = failure {
        for arena in &arenas {
            if let Err(teardown) = arena.teardown() {
                warn!(path = %arena.path().display(), error = %teardown, "failed to tear down arena");
            }
        }
        return Err(e);
    }
    Ok(arenas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmat::ScanOptions;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Instant;
    use tempfile::tempdir;

    /// ids starting with "fail" fail, ids starting with "slow" block until
    /// cancelled, everything else succeeds with an owned arena
    struct Scripted {
        root: PathBuf,
    }

    impl Transmat for Scripted {
        fn materialize(
            &self,
            _kind: &TransmatKind,
            id: &CommitId,
            _warehouses: &[SiloUri],
            opts: &MaterializeOptions,
        ) -> Result<Arena> {
            if id.as_str().starts_with("fail") {
                thread::sleep(Duration::from_millis(20));
                return Err(Error::corrupt("scripted failure"));
            }
            if id.as_str().starts_with("slow") {
                let deadline = Instant::now() + Duration::from_secs(10);
                while Instant::now() < deadline {
                    opts.cancel.check()?;
                    thread::sleep(Duration::from_millis(5));
                }
                return Err(Error::Unknown("never cancelled".into()));
            }
            let dir = self.root.join(id.as_str());
            fs::create_dir_all(&dir).unwrap();
            Ok(Arena::owned(dir, id.clone()))
        }

        fn scan(
            &self,
            _kind: &TransmatKind,
            _path: &Path,
            _warehouses: &[SiloUri],
            _opts: &ScanOptions,
        ) -> Result<CommitId> {
            unimplemented!()
        }
    }

    fn inputs(ids: &[&str]) -> Vec<Input> {
        ids.iter()
            .map(|id| Input::new("tar", CommitId::parse(id).unwrap(), vec![]))
            .collect()
    }

    #[test]
    fn test_all_succeed_in_input_order() {
        let dir = tempdir().unwrap();
        let tm = Scripted {
            root: dir.path().to_path_buf(),
        };
        let arenas = provision(&tm, &inputs(&["a", "b", "c"]), &MaterializeOptions::default())
            .unwrap();
        let ids: Vec<_> = arenas.iter().map(|a| a.hash().as_str().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failure_cancels_and_tears_down() {
        let dir = tempdir().unwrap();
        let tm = Scripted {
            root: dir.path().to_path_buf(),
        };
        let start = Instant::now();
        let err = provision(
            &tm,
            &inputs(&["ok", "slow1", "fail", "slow2"]),
            &MaterializeOptions::default(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WareCorrupt);
        assert!(start.elapsed() < Duration::from_secs(5));
        // the successful arena was removed again
        assert!(!dir.path().join("ok").exists());
    }

    #[test]
    fn test_reports_one_result_per_input() {
        let dir = tempdir().unwrap();
        let tm = Scripted {
            root: dir.path().to_path_buf(),
        };
        let results = materialize_all(
            &tm,
            &inputs(&["a", "fail", "slow"]),
            &MaterializeOptions::default(),
        );
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::WareCorrupt);
        assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_caller_cancel_reaches_workers() {
        let dir = tempdir().unwrap();
        let tm = Scripted {
            root: dir.path().to_path_buf(),
        };
        let opts = MaterializeOptions::default();
        let cancel = opts.cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });

        let err = provision(&tm, &inputs(&["slow"]), &opts).unwrap_err();
        canceller.join().unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_no_inputs() {
        let dir = tempdir().unwrap();
        let tm = Scripted {
            root: dir.path().to_path_buf(),
        };
        assert!(provision(&tm, &[], &MaterializeOptions::default())
            .unwrap()
            .is_empty());
    }
}
