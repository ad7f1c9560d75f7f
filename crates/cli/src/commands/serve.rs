//! Line-delimited JSON request server.
//!
//! Each input line is `{"id": .., "method": "sync" | "status" | "ping",
//! "params": {..}}`; each answer is one line `{"id": .., "result": ..}` or
//! `{"id": .., "error": ".."}`. Sync requests go through a [`SyncQueue`], so
//! one runs at a time and a request arriving while another is running or
//! waiting is refused instead of queued. Logs go to stderr; stdout carries
//! only responses.

use super::status::collect_status;
use super::sync::render_runs;
use super::{execute, SyncRequest};
use anyhow::Result;
use harnessync_sync::{AccountRun, Submit, SyncQueue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

const BUSY: &str = "Sync already in progress, please wait";

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

struct SyncJob {
    id: Value,
    request: SyncRequest,
}

pub(crate) fn handle_serve_command(project_dir: Option<PathBuf>) -> Result<()> {
    tracing::info!("serving sync requests on stdio");
    let stdin = std::io::stdin();
    serve(stdin.lock(), std::io::stdout(), project_dir, execute)
}

/// Serves requests from `input` until EOF, then waits for an accepted sync
/// to finish before returning.
pub(crate) fn serve<R, W, F>(
    input: R,
    output: W,
    default_project: Option<PathBuf>,
    runner: F,
) -> Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
    F: Fn(&SyncRequest) -> Result<Option<Vec<AccountRun>>> + Send + 'static,
{
    let output = Arc::new(Mutex::new(output));
    let worker_output = Arc::clone(&output);
    let queue = SyncQueue::spawn(move |job: SyncJob| {
        let response = match runner(&job.request) {
            Ok(Some(runs)) => Response::ok(
                job.id,
                json!({ "runs": runs, "summary": render_runs(&runs) }),
            ),
            Ok(None) => Response::err(job.id, BUSY),
            Err(e) => Response::err(job.id, format!("{e:#}")),
        };
        respond(&worker_output, &response);
    });

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                respond(&output, &Response::err(Value::Null, format!("invalid request: {e}")));
                continue;
            }
        };
        tracing::debug!(method = %request.method, "request received");

        let params = match parse_params(request.params, &default_project) {
            Ok(params) => params,
            Err(e) => {
                respond(&output, &Response::err(request.id, format!("invalid params: {e}")));
                continue;
            }
        };
        match request.method.as_str() {
            "sync" => {
                let id = request.id.clone();
                if queue.submit(SyncJob {
                    id: request.id,
                    request: params,
                }) == Submit::Busy
                {
                    respond(&output, &Response::err(id, BUSY));
                }
            }
            "status" => {
                let response = match collect_status(params.project_dir, params.account) {
                    Ok(reports) => match serde_json::to_value(reports) {
                        Ok(value) => Response::ok(request.id, value),
                        Err(e) => Response::err(request.id, e.to_string()),
                    },
                    Err(e) => Response::err(request.id, format!("{e:#}")),
                };
                respond(&output, &response);
            }
            "ping" => respond(&output, &Response::ok(request.id, json!("pong"))),
            other => respond(
                &output,
                &Response::err(request.id, format!("unknown method '{other}'")),
            ),
        }
    }

    queue.wait_idle();
    Ok(())
}

fn parse_params(
    params: Value,
    default_project: &Option<PathBuf>,
) -> serde_json::Result<SyncRequest> {
    let mut request: SyncRequest = if params.is_null() {
        SyncRequest::default()
    } else {
        serde_json::from_value(params)?
    };
    if request.project_dir.is_none() {
        request.project_dir = default_project.clone();
    }
    Ok(request)
}

fn respond<W: Write>(output: &Mutex<W>, response: &Response) {
    let mut out = output.lock();
    let written = serde_json::to_writer(&mut *out, response)
        .map_err(std::io::Error::from)
        .and_then(|()| out.write_all(b"\n"))
        .and_then(|()| out.flush());
    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harnessync_sync::{SyncOutcome, SyncReport};
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn responses(&self) -> Vec<Value> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn one_run(request: &SyncRequest) -> Vec<AccountRun> {
        vec![AccountRun {
            account: request.account.clone(),
            outcome: SyncOutcome::Completed(SyncReport {
                dry_run: request.dry_run,
                ..SyncReport::default()
            }),
        }]
    }

    #[test]
    fn answers_ping_bad_lines_and_unknown_methods() {
        let input = Cursor::new(
            "{\"id\":1,\"method\":\"ping\"}\n\nnot json\n{\"id\":2,\"method\":\"explode\"}\n",
        );
        let out = SharedBuf::default();
        serve(input, out.clone(), None, |_: &SyncRequest| Ok(Some(Vec::new()))).unwrap();

        let responses = out.responses();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], json!({"id": 1, "result": "pong"}));
        assert!(responses[1]["error"].as_str().unwrap().starts_with("invalid request"));
        assert_eq!(responses[2]["error"], "unknown method 'explode'");
    }

    #[test]
    fn sync_params_reach_the_runner_with_default_project() {
        let input = Cursor::new(
            "{\"id\":\"a\",\"method\":\"sync\",\"params\":{\"dry_run\":true,\"account\":\"work\"}}\n",
        );
        let out = SharedBuf::default();
        let (seen_tx, seen_rx) = mpsc::channel();
        serve(
            input,
            out.clone(),
            Some(PathBuf::from("/proj")),
            move |request: &SyncRequest| {
                seen_tx.send(request.clone()).unwrap();
                Ok(Some(one_run(request)))
            },
        )
        .unwrap();

        let seen = seen_rx.recv().unwrap();
        assert_eq!(seen.project_dir, Some(PathBuf::from("/proj")));
        assert!(seen.dry_run);
        let responses = out.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], "a");
        assert_eq!(responses[0]["result"]["runs"][0]["account"], "work");
        assert_eq!(responses[0]["result"]["runs"][0]["outcome"]["outcome"], "completed");
    }

    #[test]
    fn overlapping_sync_is_refused_as_busy() {
        let input = Cursor::new(
            "{\"id\":1,\"method\":\"sync\"}\n{\"id\":2,\"method\":\"sync\"}\n",
        );
        let out = SharedBuf::default();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let server_out = out.clone();
        let server = std::thread::spawn(move || {
            serve(input, server_out, None, move |request: &SyncRequest| {
                release_rx.lock().unwrap().recv().unwrap();
                Ok(Some(one_run(request)))
            })
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while out.responses().is_empty() {
            assert!(Instant::now() < deadline, "no busy response");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(out.responses()[0], json!({"id": 2, "error": BUSY}));

        release_tx.send(()).unwrap();
        server.join().unwrap().unwrap();
        let responses = out.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1]["id"], 1);
        assert!(responses[1]["result"]["summary"]
            .as_str()
            .unwrap()
            .contains("HarnessSync Results"));
    }

    #[test]
    fn lock_contention_and_errors_become_error_responses() {
        let input = Cursor::new("{\"id\":1,\"method\":\"sync\"}\n");
        let out = SharedBuf::default();
        serve(input, out.clone(), None, |_: &SyncRequest| Ok(None)).unwrap();
        assert_eq!(out.responses()[0]["error"], BUSY);

        let input = Cursor::new("{\"id\":1,\"method\":\"sync\",\"params\":{\"scope\":\"nope\"}}\n");
        let out = SharedBuf::default();
        serve(input, out.clone(), None, |_: &SyncRequest| Ok(None)).unwrap();
        assert!(out.responses()[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid params"));

        let input = Cursor::new("{\"id\":1,\"method\":\"sync\"}\n");
        let out = SharedBuf::default();
        serve(input, out.clone(), None, |_: &SyncRequest| {
            Err(anyhow::anyhow!("disk full"))
        })
        .unwrap();
        assert_eq!(out.responses()[0]["error"], "disk full");
    }
}
