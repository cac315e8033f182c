use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::AppError;
use crate::services::ocr_service::OcrOptions;

pub const WORKER_SUBCOMMAND: &str = "worker";
const POLL_INTERVAL: Duration = Duration::from_millis(75);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Text(String),
    NoText,
    TimedOut,
    Crashed(String),
    Cancelled,
}

impl TaskOutcome {
    /// `None` means the path must not be recorded at all.
    pub fn into_record(self) -> Option<Option<String>> {
        match self {
            TaskOutcome::Text(text) => Some(Some(text)),
            TaskOutcome::NoText | TaskOutcome::TimedOut | TaskOutcome::Crashed(_) => Some(None),
            TaskOutcome::Cancelled => None,
        }
    }
}

#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, path: &str, cancel: &AtomicBool) -> TaskOutcome;
}

pub fn worker_args(options: &OcrOptions) -> Vec<String> {
    let mut args = vec![
        WORKER_SUBCOMMAND.to_string(),
        "--lang".to_string(),
        options.language.clone(),
        "--psm".to_string(),
        options.page_seg_mode.to_string(),
        "--oem".to_string(),
        options.engine_mode.to_string(),
    ];
    if !options.preserve_interword_spaces {
        args.push("--no-preserve-spaces".to_string());
    }
    args
}

/// Runs each task as `<program> <base_args...> <path>` under a hard deadline.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    base_args: Vec<String>,
    deadline: Duration,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            base_args,
            deadline,
        }
    }

    pub fn for_current_exe(options: &OcrOptions, deadline: Duration) -> Result<Self, AppError> {
        let exe = std::env::current_exe()
            .map_err(|e| AppError::Worker(format!("cannot locate own executable: {e}")))?;
        Ok(Self::new(exe, worker_args(options), deadline))
    }
}

fn parse_reply(stdout: &[u8]) -> TaskOutcome {
    match serde_json::from_slice::<WorkerReply>(stdout) {
        Ok(WorkerReply { text: Some(text) }) => TaskOutcome::Text(text),
        Ok(WorkerReply { text: None }) => TaskOutcome::NoText,
        Err(e) => TaskOutcome::Crashed(format!("unreadable worker reply: {e}")),
    }
}

// Each worker leads its own process group: a terminal interrupt reaches only
// the coordinator, and a kill reaches the OCR engine the worker spawned.
#[cfg(unix)]
fn isolate(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

#[cfg(unix)]
fn kill_group(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(pid, error = %std::io::Error::last_os_error(), "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &tokio::process::Child) {}

#[cfg(unix)]
fn killed_by_signal(status: &std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn killed_by_signal(_status: &std::process::ExitStatus) -> bool {
    false
}

#[async_trait]
impl TaskRunner for ProcessRunner {
    async fn run(&self, path: &str, cancel: &AtomicBool) -> TaskOutcome {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        isolate(&mut command);
        let spawned = command.spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => return TaskOutcome::Crashed(format!("spawn failed: {e}")),
        };
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return TaskOutcome::Crashed("worker stdout unavailable".to_string());
        };

        let started = tokio::time::Instant::now();
        let mut buf = Vec::new();
        let finished = {
            let mut finish = Box::pin(async {
                let read = stdout.read_to_end(&mut buf).await;
                let status = child.wait().await;
                (read, status)
            });
            loop {
                let remaining = self.deadline.saturating_sub(started.elapsed());
                tokio::select! {
                    done = &mut finish => break Ok(done),
                    _ = tokio::time::sleep(POLL_INTERVAL.min(remaining)) => {
                        if cancel.load(Ordering::Relaxed) {
                            break Err(TaskOutcome::Cancelled);
                        }
                        if started.elapsed() >= self.deadline {
                            break Err(TaskOutcome::TimedOut);
                        }
                    }
                }
            }
        };

        match finished {
            Err(outcome) => {
                kill_group(&child);
                let _ = child.kill().await;
                tracing::debug!(path, ?outcome, "worker killed");
                outcome
            }
            Ok((Err(e), _)) | Ok((_, Err(e))) => {
                TaskOutcome::Crashed(format!("worker io failed: {e}"))
            }
            Ok((Ok(_), Ok(status))) if killed_by_signal(&status) => {
                // an interrupt can land just before the cancel flag is raised
                tokio::time::sleep(POLL_INTERVAL).await;
                if cancel.load(Ordering::Relaxed) {
                    TaskOutcome::Cancelled
                } else {
                    TaskOutcome::Crashed(format!("worker killed by {status}"))
                }
            }
            Ok((Ok(_), Ok(status))) if !status.success() => {
                TaskOutcome::Crashed(format!("worker exited with {status}"))
            }
            Ok((Ok(_), Ok(_))) => parse_reply(&buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_records() {
        assert_eq!(
            TaskOutcome::Text("hi".into()).into_record(),
            Some(Some("hi".to_string()))
        );
        assert_eq!(TaskOutcome::NoText.into_record(), Some(None));
        assert_eq!(TaskOutcome::TimedOut.into_record(), Some(None));
        assert_eq!(TaskOutcome::Crashed("x".into()).into_record(), Some(None));
        assert_eq!(TaskOutcome::Cancelled.into_record(), None);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(
            parse_reply(br#"{"text":"Total: 12"}"#),
            TaskOutcome::Text("Total: 12".into())
        );
        assert_eq!(parse_reply(br#"{"text":null}"#), TaskOutcome::NoText);
        assert!(matches!(parse_reply(b"Segmentation fault"), TaskOutcome::Crashed(_)));
        assert!(matches!(parse_reply(b""), TaskOutcome::Crashed(_)));
    }

    #[test]
    fn test_worker_args() {
        let args = worker_args(&OcrOptions::default());
        assert_eq!(args, vec!["worker", "--lang", "eng", "--psm", "11", "--oem", "3"]);

        let options = OcrOptions {
            preserve_interword_spaces: false,
            ..OcrOptions::default()
        };
        assert_eq!(worker_args(&options).last().unwrap(), "--no-preserve-spaces");
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::sync::Arc;
        use std::time::Instant;

        fn shell(script: &str, deadline: Duration) -> ProcessRunner {
            // `sh -c <script> sh <path>` exposes the task path as $1
            ProcessRunner::new(
                "sh",
                vec!["-c".to_string(), script.to_string(), "sh".to_string()],
                deadline,
            )
        }

        #[tokio::test]
        async fn test_successful_worker_reply() {
            let runner = shell(r#"printf '{"text":"seen %s"}' "$1""#, Duration::from_secs(10));
            let outcome = runner.run("/pics/a.png", &AtomicBool::new(false)).await;
            assert_eq!(outcome, TaskOutcome::Text("seen /pics/a.png".into()));
        }

        #[tokio::test]
        async fn test_null_worker_reply() {
            let runner = shell(r#"printf '{"text":null}'"#, Duration::from_secs(10));
            let outcome = runner.run("/pics/a.png", &AtomicBool::new(false)).await;
            assert_eq!(outcome, TaskOutcome::NoText);
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_crash() {
            let runner = shell(r#"printf '{"text":"partial"}'; exit 3"#, Duration::from_secs(10));
            let outcome = runner.run("/pics/a.png", &AtomicBool::new(false)).await;
            assert!(matches!(outcome, TaskOutcome::Crashed(_)), "got {outcome:?}");
        }

        #[tokio::test]
        async fn test_garbage_output_is_crash() {
            let runner = shell("echo not json", Duration::from_secs(10));
            let outcome = runner.run("/pics/a.png", &AtomicBool::new(false)).await;
            assert!(matches!(outcome, TaskOutcome::Crashed(_)));
        }

        #[tokio::test]
        async fn test_missing_program_is_crash() {
            let runner = ProcessRunner::new(
                "/nonexistent/ocrindex_worker_xyz",
                Vec::new(),
                Duration::from_secs(1),
            );
            let outcome = runner.run("/pics/a.png", &AtomicBool::new(false)).await;
            assert!(matches!(outcome, TaskOutcome::Crashed(_)));
        }

        #[tokio::test]
        async fn test_deadline_kills_hung_worker() {
            let runner = shell("sleep 30", Duration::from_millis(300));
            let started = Instant::now();
            let outcome = runner.run("/pics/slow.png", &AtomicBool::new(false)).await;
            assert_eq!(outcome, TaskOutcome::TimedOut);
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "timeout took {:?}",
                started.elapsed()
            );
        }

        #[tokio::test]
        async fn test_deadline_does_not_block_silent_worker_holding_stdout() {
            // worker stays alive after printing; the deadline still applies
            let runner = shell(r#"printf '{"text":"x"}'; sleep 30"#, Duration::from_millis(300));
            let started = Instant::now();
            let outcome = runner.run("/pics/a.png", &AtomicBool::new(false)).await;
            assert_eq!(outcome, TaskOutcome::TimedOut);
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_cancel_flag_kills_worker() {
            let runner = shell("sleep 30", Duration::from_secs(60));
            let cancel = AtomicBool::new(true);
            let started = Instant::now();
            let outcome = runner.run("/pics/a.png", &cancel).await;
            assert_eq!(outcome, TaskOutcome::Cancelled);
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        fn cancel_after(delay: Duration) -> Arc<AtomicBool> {
            let flag = Arc::new(AtomicBool::new(false));
            let setter = flag.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                setter.store(true, Ordering::Relaxed);
            });
            flag
        }

        #[tokio::test]
        async fn test_cancel_kills_running_worker() {
            let runner = shell("sleep 30", Duration::from_secs(60));
            let cancel = cancel_after(Duration::from_millis(200));
            let started = Instant::now();
            let outcome = runner.run("/pics/a.png", &cancel).await;
            assert_eq!(outcome, TaskOutcome::Cancelled);
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_worker_interrupted_alongside_cancel_stays_undecided() {
            // the interrupt reaches the worker just before the flag is raised
            let runner = shell("sleep 0.3; kill -INT $$; sleep 5", Duration::from_secs(60));
            let cancel = cancel_after(Duration::from_millis(320));
            let outcome = runner.run("/pics/a.png", &cancel).await;
            assert_eq!(outcome, TaskOutcome::Cancelled);
            assert_eq!(outcome.into_record(), None);
        }

        #[tokio::test]
        async fn test_signal_death_without_cancel_is_crash() {
            let runner = shell("kill -KILL $$", Duration::from_secs(10));
            let outcome = runner.run("/pics/a.png", &AtomicBool::new(false)).await;
            assert!(matches!(outcome, TaskOutcome::Crashed(_)), "got {outcome:?}");
        }

        #[cfg(target_os = "linux")]
        fn proc_state(pid: u32) -> Option<char> {
            let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
            // state follows the parenthesised command name
            stat.rsplit(')').next()?.trim_start().chars().next()
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_worker_leads_its_own_process_group() {
            let runner = shell(
                r#"printf '{"text":"%s %s"}' "$$" "$(cut -d' ' -f5 /proc/$$/stat)""#,
                Duration::from_secs(10),
            );
            let TaskOutcome::Text(text) = runner.run("/pics/a.png", &AtomicBool::new(false)).await
            else {
                panic!("worker did not reply");
            };
            let ids: Vec<&str> = text.split_whitespace().collect();
            assert_eq!(ids.len(), 2, "got {text}");
            assert_eq!(ids[0], ids[1]);
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_deadline_kill_reaches_worker_children() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("child.pid");
            // the task path doubles as the place the worker records its child
            let runner = shell(r#"sleep 30 & echo $! > "$1"; wait"#, Duration::from_millis(300));
            let outcome = runner
                .run(pid_file.to_str().unwrap(), &AtomicBool::new(false))
                .await;
            assert_eq!(outcome, TaskOutcome::TimedOut);

            let pid: u32 = std::fs::read_to_string(&pid_file)
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            let deadline = Instant::now() + Duration::from_secs(3);
            loop {
                match proc_state(pid) {
                    None | Some('Z') | Some('X') => break,
                    Some(state) => {
                        assert!(Instant::now() < deadline, "child {pid} still in state {state}");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
}
