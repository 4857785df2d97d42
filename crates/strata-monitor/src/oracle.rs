//! Change-oracle clients: IPC daemon and one-shot hook.
//!
//! Both backends answer one question: "what changed since this token?"
//! The response is parsed here into [`QueryOutcome`] so nothing
//! downstream looks at raw wire bytes.

use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use bstr::{BStr, BString, ByteSlice};
use tracing::{debug, warn};

use crate::settings::{HookVersion, MonitorMode, MonitorSettings};

/// Token sent to (and stored after talking to) the daemon when no real
/// token exists yet.
pub const FAKE_TOKEN: &str = "builtin:fake";

/// Read-buffer hint for oracle responses; they are usually tiny.
const RESPONSE_BUF_HINT: usize = 1024;

/// A parsed oracle response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The oracle has no information; everything is possibly dirty.
    Trivial { token: BString },
    /// Paths changed since the queried token, in reported order.
    Paths { token: BString, paths: Vec<BString> },
    /// The oracle could not be reached or gave an unusable answer.
    Failed,
}

/// Uniform query capability over the two oracle flavors.
pub trait Oracle {
    /// One query per refresh; `token` is the last stored token, if any.
    fn query(&mut self, token: Option<&BStr>) -> QueryOutcome;

    /// Token to persist when the query failed, so the next invocation
    /// starts from unambiguous state.
    fn fallback_token(&self) -> BString;
}

/// Current high-resolution clock reading as nanoseconds since the epoch.
pub(crate) fn nanos_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Build the configured oracle backend.
pub(crate) fn from_settings(settings: &MonitorSettings) -> Box<dyn Oracle> {
    match settings.mode {
        MonitorMode::Ipc => Box::new(IpcOracle {
            socket_path: settings.socket_path.clone(),
        }),
        MonitorMode::Hook => Box::new(HookOracle {
            hook_path: settings.hook_path.clone().unwrap_or_default(),
            worktree: settings.worktree.clone(),
            preference: settings.hook_version,
        }),
        MonitorMode::Disabled => Box::new(DisabledOracle),
    }
}

/// Split off the first NUL-terminated string (the new token).
fn split_token(response: &[u8]) -> Option<(&[u8], &[u8])> {
    let nul = response.find_byte(0)?;
    Some((&response[..nul], &response[nul + 1..]))
}

/// A body that is a single `/` means "no information"; otherwise it is a
/// NUL-delimited path list (the final path may be unterminated).
fn classify_body(token: &[u8], body: &[u8]) -> QueryOutcome {
    if body.first() == Some(&b'/') {
        return QueryOutcome::Trivial {
            token: BString::from(token),
        };
    }
    let paths = body
        .split(|&b| b == 0)
        .filter(|p| !p.is_empty())
        .map(BString::from)
        .collect();
    QueryOutcome::Paths {
        token: BString::from(token),
        paths,
    }
}

/// Client for the long-lived daemon behind a Unix-domain socket.
///
/// Wire: send `token\0`, read `new_token\0 (path\0)*` until EOF.
pub struct IpcOracle {
    pub socket_path: PathBuf,
}

impl Oracle for IpcOracle {
    fn query(&mut self, token: Option<&BStr>) -> QueryOutcome {
        let mut stream = match UnixStream::connect(&self.socket_path) {
            Ok(s) => s,
            Err(e) => {
                debug!(socket = %self.socket_path.display(), error = %e, "daemon unreachable");
                return QueryOutcome::Failed;
            }
        };

        let token: &[u8] = match token {
            Some(t) => t,
            None => FAKE_TOKEN.as_bytes(),
        };
        let mut request = Vec::with_capacity(token.len() + 1);
        request.extend_from_slice(token);
        request.push(0);
        if stream.write_all(&request).is_err()
            || stream.shutdown(std::net::Shutdown::Write).is_err()
        {
            return QueryOutcome::Failed;
        }

        let mut response = Vec::with_capacity(RESPONSE_BUF_HINT);
        if stream.read_to_end(&mut response).is_err() {
            return QueryOutcome::Failed;
        }
        debug!(len = response.len(), "daemon query response");

        match split_token(&response) {
            Some((new_token, body)) if !new_token.is_empty() => classify_body(new_token, body),
            _ => QueryOutcome::Failed,
        }
    }

    fn fallback_token(&self) -> BString {
        BString::from(FAKE_TOKEN)
    }
}

/// Client for the one-shot hook process.
///
/// The hook is spawned from the working tree as `hook <version> <token>`.
/// Protocol V2 embeds the new token in stdout (`new_token\0 body`);
/// protocol V1 has a bare body, so the token is synthesized from a clock
/// reading taken before the query so no change can slip between them.
pub struct HookOracle {
    pub hook_path: PathBuf,
    pub worktree: PathBuf,
    pub preference: Option<HookVersion>,
}

impl HookOracle {
    fn run(&self, version: HookVersion, token: &BStr) -> Option<Vec<u8>> {
        let output = Command::new(&self.hook_path)
            .arg(version.as_arg())
            .arg(std::ffi::OsStr::from_bytes(token))
            .current_dir(&self.worktree)
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(hook = %self.hook_path.display(), status = %output.status, "hook query failed");
            return None;
        }
        debug!(len = output.stdout.len(), "hook query response");
        Some(output.stdout)
    }

    fn query_v2(&self, token: &BStr) -> QueryOutcome {
        let Some(stdout) = self.run(HookVersion::V2, token) else {
            return QueryOutcome::Failed;
        };
        match split_token(&stdout) {
            Some((new_token, body)) if !new_token.is_empty() => classify_body(new_token, body),
            _ => {
                warn!("empty token in monitor hook response");
                QueryOutcome::Failed
            }
        }
    }

    fn query_v1(&self, token: &BStr, clock_token: u64) -> QueryOutcome {
        let Some(stdout) = self.run(HookVersion::V1, token) else {
            return QueryOutcome::Failed;
        };
        classify_body(clock_token.to_string().as_bytes(), &stdout)
    }
}

impl Oracle for HookOracle {
    fn query(&mut self, token: Option<&BStr>) -> QueryOutcome {
        // Without a stored token there is nothing the hook can diff
        // against; the caller falls back to checking everything.
        let Some(token) = token else {
            return QueryOutcome::Failed;
        };

        // Taken before the query so the V1 token is inclusive of any
        // change racing with the hook.
        let clock_token = nanos_since_epoch();

        match self.preference {
            Some(HookVersion::V1) => self.query_v1(token, clock_token),
            Some(HookVersion::V2) => self.query_v2(token),
            None => match self.query_v2(token) {
                QueryOutcome::Failed => self.query_v1(token, clock_token),
                outcome => outcome,
            },
        }
    }

    fn fallback_token(&self) -> BString {
        BString::from(nanos_since_epoch().to_string())
    }
}

/// Placeholder backend for disabled mode; refresh never queries it.
struct DisabledOracle;

impl Oracle for DisabledOracle {
    fn query(&mut self, _token: Option<&BStr>) -> QueryOutcome {
        QueryOutcome::Failed
    }

    fn fallback_token(&self) -> BString {
        BString::from(FAKE_TOKEN)
    }
}
