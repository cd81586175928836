//! Keystroke injection into the assistant's terminal.
//!
//! Detection priority at startup:
//!
//! 1. tmux — `TMUX` set and the binary on `PATH`. Most reliable, works
//!    over SSH and on every platform.
//! 2. AppleScript — macOS with `osascript` available.
//! 3. xdotool — Linux with an X display and the binary on `PATH`.
//!
//! A forced method from the config wins over detection. `dispatch` types
//! the text followed by Enter and reports success iff the subprocess
//! exits cleanly.

use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMethod {
    Tmux,
    AppleScript,
    Xdotool,
}

impl DispatchMethod {
    pub fn name(self) -> &'static str {
        match self {
            DispatchMethod::Tmux => "tmux",
            DispatchMethod::AppleScript => "applescript",
            DispatchMethod::Xdotool => "xdotool",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "tmux" => Some(DispatchMethod::Tmux),
            "applescript" => Some(DispatchMethod::AppleScript),
            "xdotool" => Some(DispatchMethod::Xdotool),
            _ => None,
        }
    }
}

pub struct ResponseDispatcher {
    forced_method: String,
    method: Mutex<Option<DispatchMethod>>,
}

impl ResponseDispatcher {
    /// `forced_method` comes from the config; empty means auto-detect.
    pub fn new(forced_method: &str) -> Self {
        Self {
            forced_method: forced_method.to_string(),
            method: Mutex::new(None),
        }
    }

    /// Resolve the injection method for this host.
    pub fn start(&self) {
        let method = if self.forced_method.is_empty() {
            detect_method()
        } else {
            let parsed = DispatchMethod::from_name(&self.forced_method);
            if parsed.is_none() {
                warn!(method = %self.forced_method, "unknown forced dispatch method");
            }
            parsed
        };

        *self.method.lock() = method;
        match method {
            Some(method) => info!(method = method.name(), "response dispatch ready"),
            None => warn!("no response dispatch method available"),
        }
    }

    pub fn stop(&self) {
        *self.method.lock() = None;
    }

    pub fn is_available(&self) -> bool {
        self.method.lock().is_some()
    }

    pub fn method_name(&self) -> Option<&'static str> {
        self.method.lock().map(DispatchMethod::name)
    }

    /// Inject `text` + Enter into the focused terminal.
    ///
    /// Returns `true` iff the injection subprocess(es) exited cleanly.
    pub async fn dispatch(&self, text: &str) -> bool {
        let method = *self.method.lock();
        let Some(method) = method else {
            warn!("dispatch unavailable — cannot send response");
            return false;
        };

        let result = match method {
            DispatchMethod::Tmux => dispatch_tmux(text).await,
            DispatchMethod::AppleScript => dispatch_applescript(text).await,
            DispatchMethod::Xdotool => dispatch_xdotool(text).await,
        };
        if !result {
            warn!(method = method.name(), "dispatch failed");
        }
        result
    }
}

async fn dispatch_tmux(text: &str) -> bool {
    run_ok(Command::new("tmux").args(["send-keys", text, "Enter"])).await
}

async fn dispatch_applescript(text: &str) -> bool {
    let script = applescript_for(text);
    run_ok(Command::new("osascript").args(["-e", &script])).await
}

async fn dispatch_xdotool(text: &str) -> bool {
    if !run_ok(Command::new("xdotool").args(["type", "--clearmodifiers", text])).await {
        return false;
    }
    run_ok(Command::new("xdotool").args(["key", "Return"])).await
}

async fn run_ok(command: &mut Command) -> bool {
    match command.output().await {
        Ok(output) => {
            if !output.status.success() {
                warn!(
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "injection subprocess failed"
                );
            }
            output.status.success()
        }
        Err(e) => {
            warn!("failed to spawn injection subprocess: {e}");
            false
        }
    }
}

/// Keystroke script with `text` escaped for an AppleScript string literal.
fn applescript_for(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "tell application \"System Events\"\n    keystroke \"{escaped}\"\n    delay 0.1\n    keystroke return\nend tell"
    )
}

fn detect_method() -> Option<DispatchMethod> {
    if std::env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false) && which_available("tmux") {
        return Some(DispatchMethod::Tmux);
    }
    if cfg!(target_os = "macos") && which_available("osascript") {
        return Some(DispatchMethod::AppleScript);
    }
    if which_available("xdotool")
        && std::env::var("DISPLAY").map(|v| !v.is_empty()).unwrap_or(false)
    {
        return Some(DispatchMethod::Xdotool);
    }
    None
}

/// Return `true` when `name` can be found on `PATH`.
fn which_available(name: &str) -> bool {
    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            if dir.join(name).is_file() {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applescript_escapes_quotes_and_backslashes() {
        let script = applescript_for(r#"say "hi" \ bye"#);
        assert!(script.contains(r#"keystroke "say \"hi\" \\ bye""#));
        assert!(script.ends_with("end tell"));
    }

    #[test]
    fn method_names_round_trip() {
        for method in [
            DispatchMethod::Tmux,
            DispatchMethod::AppleScript,
            DispatchMethod::Xdotool,
        ] {
            assert_eq!(DispatchMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(DispatchMethod::from_name("telekinesis"), None);
    }

    #[test]
    fn forced_method_wins_over_detection() {
        let dispatcher = ResponseDispatcher::new("tmux");
        dispatcher.start();
        assert!(dispatcher.is_available());
        assert_eq!(dispatcher.method_name(), Some("tmux"));

        let unknown = ResponseDispatcher::new("telekinesis");
        unknown.start();
        assert!(!unknown.is_available());
    }

    #[cfg(unix)]
    #[test]
    fn which_finds_common_binaries() {
        assert!(which_available("sh"));
        assert!(!which_available("definitely-not-a-real-binary-name"));
    }

    #[tokio::test]
    async fn dispatch_without_method_returns_false() {
        let dispatcher = ResponseDispatcher::new("");
        // start() not called: no method resolved.
        assert!(!dispatcher.dispatch("hello").await);
    }
}
