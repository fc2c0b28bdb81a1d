//! Process binding: engines run as standalone executables.
//!
//! Any executable file is accepted. The engine receives its parameters as
//! positional arguments, writes the result to the output path it was given,
//! and signals success with exit code 0. Audio is read back from that file,
//! never from standard output.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};

use super::{EngineBinding, InvokeContext, Probe};
use crate::contract::{EngineInfo, EngineInput, EngineOutput};
use crate::engine::descriptor::BindingKind;
use crate::error::{EngineError, InvocationCause};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long stderr may stay open after the engine itself has exited.
const STDERR_GRACE: Duration = Duration::from_millis(250);

const PITCH_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// How a process engine is launched.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Append `!tempo` and the encoded pitch bend after the fixed arguments
    pub append_tempo_and_pitch: bool,
    pub working_dir: Option<PathBuf>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            append_tempo_and_pitch: true,
            working_dir: None,
        }
    }
}

/// Binding to an executable engine.
pub struct ProcessBinding {
    location: String,
    path: PathBuf,
    options: ProcessOptions,
}

impl ProcessBinding {
    pub fn new(location: impl Into<String>, options: ProcessOptions) -> Self {
        let location = location.into();
        Self {
            path: PathBuf::from(&location),
            location,
            options,
        }
    }

    /// Accept `location` if it is an executable file.
    pub fn probe(location: &str, options: &ProcessOptions) -> Probe {
        let path = Path::new(location);
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() && is_executable(&meta) => {
                Probe::Bound(Box::new(Self::new(location, options.clone())))
            }
            Ok(_) => Probe::Unrecognized(format!("{} is not an executable file", location)),
            Err(err) => Probe::Unrecognized(format!("{}: {}", location, err)),
        }
    }

    /// Positional arguments for one invocation, in engine order.
    pub fn arguments(&self, input: &EngineInput) -> Vec<String> {
        let mut args = vec![
            input.input_wave_file.clone(),
            input.output_wave_file.clone(),
            input.note_string.clone(),
            format_number(input.velocity),
            input.flags.clone(),
            format_number(input.offset),
            format_number(input.required_length),
            format_number(input.consonant),
            format_number(input.cutoff),
            format_number(input.volume),
            format_number(input.modulation),
        ];
        if self.options.append_tempo_and_pitch {
            args.push(format!("!{}", format_number(input.tempo)));
            args.push(encode_pitch_bend(&input.pitch_bend));
        }
        args
    }

    fn fail(&self, cause: InvocationCause) -> EngineError {
        EngineError::invocation(&self.location, cause)
    }

    fn wait(
        &self,
        child: &mut Child,
        ctx: &InvokeContext,
        deadline: Option<Instant>,
    ) -> Result<ExitStatus, EngineError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(err) => return Err(self.fail(InvocationCause::Spawn(err.to_string()))),
            }

            if ctx.cancel.is_cancelled() {
                terminate(child);
                log::info!("[ProcessBinding] Cancelled {}", self.location);
                return Err(self.fail(InvocationCause::Cancelled));
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                terminate(child);
                log::warn!(
                    "[ProcessBinding] {} exceeded {} ms, terminated",
                    self.location,
                    ctx.timeout_ms()
                );
                return Err(self.fail(InvocationCause::Timeout {
                    timeout_ms: ctx.timeout_ms(),
                }));
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Reads an engine's stderr on a helper thread, chunk by chunk.
struct StderrDrain {
    chunks: Receiver<Vec<u8>>,
    collected: Vec<u8>,
}

impl StderrDrain {
    fn spawn(mut stderr: ChildStderr) -> Self {
        let (tx, chunks) = unbounded();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match stderr.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            chunks,
            collected: Vec::new(),
        }
    }

    /// Collect stderr until the pipe closes, the grace period or deadline
    /// runs out, or the caller cancels. Background children of the engine
    /// can hold the pipe open; the reader is then left detached.
    fn finish(mut self, ctx: &InvokeContext, deadline: Option<Instant>) -> String {
        let mut limit = Instant::now() + STDERR_GRACE;
        if let Some(deadline) = deadline {
            limit = limit.min(deadline);
        }
        loop {
            let now = Instant::now();
            if now >= limit || ctx.cancel.is_cancelled() {
                log::debug!("[ProcessBinding] Stopped waiting for stderr to close");
                break;
            }
            match self.chunks.recv_timeout((limit - now).min(POLL_INTERVAL * 4)) {
                Ok(chunk) => self.collected.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        while let Ok(chunk) = self.chunks.try_recv() {
            self.collected.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&self.collected).into_owned()
    }
}

impl EngineBinding for ProcessBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::Process
    }

    fn describe(&self) -> Result<EngineInfo, EngineError> {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.location.clone());
        Ok(EngineInfo::unnamed(name))
    }

    fn invoke(
        &self,
        input: &EngineInput,
        ctx: &InvokeContext,
    ) -> Result<EngineOutput, EngineError> {
        let deadline = ctx.deadline(Instant::now());
        if input.output_wave_file.is_empty() {
            return Err(self.fail(InvocationCause::Encoding(
                "output wave path is empty".to_string(),
            )));
        }
        let output_path = Path::new(&input.output_wave_file);
        match fs::remove_file(output_path) {
            Ok(()) => log::debug!("[ProcessBinding] Removed stale {}", output_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(self.fail(InvocationCause::Spawn(format!(
                    "cannot clear {}: {}",
                    output_path.display(),
                    err
                ))))
            }
        }

        let mut command = Command::new(&self.path);
        command
            .args(self.arguments(input))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.options.working_dir {
            command.current_dir(dir);
        }

        log::debug!("[ProcessBinding] Launching {}", self.location);
        let mut child = command
            .spawn()
            .map_err(|err| self.fail(InvocationCause::Spawn(err.to_string())))?;

        // Drain stderr on its own thread so a chatty engine cannot block on a full pipe.
        let stderr = child.stderr.take().map(StderrDrain::spawn);

        let status = self.wait(&mut child, ctx, deadline)?;
        let stderr = stderr
            .map(|drain| drain.finish(ctx, deadline))
            .unwrap_or_default();

        if !status.success() {
            return Err(self.fail(InvocationCause::ExitStatus {
                code: status.code(),
                stderr,
            }));
        }

        match fs::read(output_path) {
            Ok(bytes) => Ok(EngineOutput::new(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(self.fail(InvocationCause::MissingOutput {
                    path: input.output_wave_file.clone(),
                }))
            }
            Err(err) => Err(self.fail(InvocationCause::Engine(format!(
                "cannot read {}: {}",
                output_path.display(),
                err
            )))),
        }
    }
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

/// Integers print without a fractional part (`100`, not `100.0`).
fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// Encode pitch bend samples in the 12-bit base64 form.
///
/// Each sample is clamped to -2048..=2047 and written as two characters.
/// A run of identical samples is written once followed by `#n#`, where `n`
/// counts the additional repeats.
pub fn encode_pitch_bend(samples: &[i32]) -> String {
    let mut encoded = String::with_capacity(samples.len() * 2);
    let mut index = 0;
    while index < samples.len() {
        let value = samples[index].clamp(-2048, 2047);
        let mut run = 1;
        while index + run < samples.len() && samples[index + run].clamp(-2048, 2047) == value {
            run += 1;
        }

        let bits = (if value < 0 { value + 4096 } else { value }) as usize;
        encoded.push(PITCH_ALPHABET[bits >> 6] as char);
        encoded.push(PITCH_ALPHABET[bits & 0x3f] as char);
        if run > 1 {
            encoded.push('#');
            encoded.push_str(&(run - 1).to_string());
            encoded.push('#');
        }
        index += run;
    }
    encoded
}
