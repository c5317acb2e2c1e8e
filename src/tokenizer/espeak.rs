use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{Phonemizer, TokenizeError};

/// How often a running espeak-ng process is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Location of the espeak-ng binary and its data directory.
///
/// Either path can be `None` to fall back to the system default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EspeakConfig {
    pub bin_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    /// Upper bound on one espeak-ng run. A request deadline that ends sooner
    /// takes precedence.
    pub timeout_ms: u64,
}

impl Default for EspeakConfig {
    fn default() -> Self {
        Self {
            bin_path: None,
            data_path: None,
            timeout_ms: 10_000,
        }
    }
}

/// IPA phonemizer backed by an `espeak-ng` subprocess.
#[derive(Debug, Clone)]
pub struct EspeakPhonemizer {
    voice: String,
    config: EspeakConfig,
}

impl EspeakPhonemizer {
    /// `voice` is the espeak-ng language code (e.g. `"en-us"`, `"fr"`, `"cmn"`).
    pub fn new(voice: impl Into<String>, config: EspeakConfig) -> Self {
        Self {
            voice: voice.into(),
            config,
        }
    }

    fn command(&self) -> Command {
        let bin = self
            .config
            .bin_path
            .as_deref()
            .map(|p| p.as_os_str())
            .unwrap_or_else(|| "espeak-ng".as_ref());

        let mut command = Command::new(bin);
        command
            .args(["--ipa", "--stdin", "-q", "-v", &self.voice])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(data) = &self.config.data_path {
            command.env("ESPEAK_DATA_PATH", data);
        }
        command
    }

    /// Run espeak-ng once over `input`, killing it at `expires`.
    fn run(&self, input: &str, expires: Instant) -> Result<String, TokenizeError> {
        let mut child = self.command().spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TokenizeError::EspeakNotFound
            } else {
                TokenizeError::Io(e)
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // Input is line oriented; an unterminated last line can lose its
            // final phoneme.
            stdin.write_all(terminate_line(input).as_bytes())?;
        }

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let status = wait_until(&mut child, expires)?;
        let stdout = collect(stdout)?;

        if !status.success() {
            let stderr = collect(stderr)?;
            return Err(TokenizeError::PhonemizerFailed(format!(
                "espeak-ng exited with code {:?}: {}",
                status.code(),
                String::from_utf8_lossy(&stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn expiry(&self, deadline: Option<Instant>) -> Instant {
        let own = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        deadline.map_or(own, |deadline| deadline.min(own))
    }
}

impl Phonemizer for EspeakPhonemizer {
    fn phonemize(
        &self,
        segments: &[&str],
        deadline: Option<Instant>,
    ) -> Result<Vec<String>, TokenizeError> {
        let expires = self.expiry(deadline);
        let output = self.run(&segments.join("\n"), expires)?;
        let lines: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        if lines.len() != segments.len() {
            log::debug!(
                "espeak-ng returned {} lines for {} segments, phonemizing one at a time",
                lines.len(),
                segments.len()
            );
            return segments
                .iter()
                .map(|segment| self.run(segment, expires).map(|out| clean_ipa(&out)))
                .collect();
        }

        Ok(lines.into_iter().map(clean_ipa).collect())
    }
}

/// Read a child pipe to the end on its own thread so a full pipe never
/// stalls the child.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>, TokenizeError> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| TokenizeError::PhonemizerFailed("pipe reader panicked".to_string()))?
            .map_err(TokenizeError::Io),
        None => Ok(Vec::new()),
    }
}

/// Poll `child` until it exits. Past `expires` the process is killed and
/// reaped; its pipe readers are left to finish on their own.
fn wait_until(child: &mut Child, expires: Instant) -> Result<ExitStatus, TokenizeError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= expires {
            log::warn!("espeak-ng (pid {}) still running at its deadline, killing it", child.id());
            // Fails only if the process exited in the meantime.
            let _ = child.kill();
            let _ = child.wait();
            return Err(TokenizeError::DeadlineExceeded);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn terminate_line(input: &str) -> Cow<'_, str> {
    if input.ends_with('\n') {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(format!("{input}\n"))
    }
}

/// Join espeak output lines and drop its `_` word-join markers.
fn clean_ipa(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|&c| c != '_')
        .collect()
}
