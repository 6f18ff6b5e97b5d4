//! Native desktop integration: folder picker, file manager, browser.
//!
//! Everything here shells out to whatever the platform provides. On a
//! headless machine the picker reports [`DesktopError::EnvironmentUnavailable`]
//! and callers fall back to `PUT /api/output-root`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::DesktopError;

/// Seam for desktop side effects so the HTTP layer can be tested headless.
pub trait Desktop: Send + Sync {
    /// Show a folder picker starting at `initial`.
    ///
    /// Returns `Ok(None)` when the user cancels.
    fn pick_folder(&self, initial: &Path) -> Result<Option<PathBuf>, DesktopError>;

    /// Open a folder or URL with the platform default handler.
    fn open(&self, target: &str) -> Result<(), DesktopError>;
}

/// Uses `osascript`, `zenity`/`kdialog`, or PowerShell for the picker and
/// `open`, `xdg-open`, or `explorer` for opening.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDesktop;

impl Desktop for SystemDesktop {
    fn pick_folder(&self, initial: &Path) -> Result<Option<PathBuf>, DesktopError> {
        // zenity and kdialog exit non-zero without a display, which would
        // read as a cancel.
        let x11_pickers = !cfg!(target_os = "macos") && !cfg!(windows);
        if x11_pickers
            && !has_display(
                std::env::var_os("DISPLAY").as_deref(),
                std::env::var_os("WAYLAND_DISPLAY").as_deref(),
            )
        {
            tracing::debug!("No DISPLAY or WAYLAND_DISPLAY, skipping the folder picker");
            return Err(DesktopError::EnvironmentUnavailable);
        }

        for mut picker in picker_commands(initial) {
            let output = match picker.output() {
                Ok(output) => output,
                // Not installed; try the next one.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::debug!("Folder picker failed to start: {}", e);
                    continue;
                }
            };
            return Ok(picked_path(&output));
        }
        Err(DesktopError::EnvironmentUnavailable)
    }

    fn open(&self, target: &str) -> Result<(), DesktopError> {
        let fail = |reason: String| DesktopError::OpenFailed {
            target: target.to_string(),
            reason,
        };

        let mut cmd = opener_command(target);
        let status = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| fail(e.to_string()))?;
        // explorer.exe exits 1 even on success.
        if status.success() || cfg!(windows) {
            Ok(())
        } else {
            Err(fail(format!("opener exited with {}", status)))
        }
    }
}

/// Open `url` in the default browser, logging instead of failing.
pub fn open_browser(desktop: &dyn Desktop, url: &str) {
    match desktop.open(url) {
        Ok(()) => tracing::info!("Opened browser at {}", url),
        Err(e) => tracing::warn!("Could not open a browser ({}). Visit {} manually.", e, url),
    }
}

fn picker_commands(initial: &Path) -> Vec<Command> {
    let initial = initial.to_string_lossy().into_owned();

    if cfg!(target_os = "macos") {
        let script = format!(
            "POSIX path of (choose folder with prompt \"Select output folder\" \
             default location POSIX file \"{}\")",
            initial.replace('"', "\\\"")
        );
        let mut cmd = Command::new("osascript");
        cmd.args(["-e", &script]);
        return vec![cmd];
    }

    if cfg!(windows) {
        let script = format!(
            "Add-Type -AssemblyName System.Windows.Forms; \
             $d = New-Object System.Windows.Forms.FolderBrowserDialog; \
             $d.SelectedPath = '{}'; \
             if ($d.ShowDialog() -eq 'OK') {{ $d.SelectedPath }}",
            initial.replace('\'', "''")
        );
        let mut cmd = Command::new("powershell");
        cmd.args(["-NoProfile", "-STA", "-Command", &script]);
        return vec![cmd];
    }

    let mut zenity = Command::new("zenity");
    zenity.args([
        "--file-selection",
        "--directory",
        "--title=Select output folder",
        &format!("--filename={}/", initial),
    ]);
    let mut kdialog = Command::new("kdialog");
    kdialog.args(["--getexistingdirectory", &initial]);
    vec![zenity, kdialog]
}

/// Whether an X11 or Wayland session is reachable.
fn has_display(display: Option<&OsStr>, wayland_display: Option<&OsStr>) -> bool {
    [display, wayland_display]
        .into_iter()
        .flatten()
        .any(|value| !value.is_empty())
}

fn opener_command(target: &str) -> Command {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    };
    let mut cmd = Command::new(program);
    cmd.arg(target);
    cmd
}

/// Pickers print the chosen folder and exit 0; cancel exits non-zero or
/// prints nothing.
fn picked_path(output: &Output) -> Option<PathBuf> {
    if !output.status.success() {
        return None;
    }
    let chosen = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if chosen.is_empty() {
        None
    } else {
        Some(PathBuf::from(chosen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn output(code: i32, stdout: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_picked_path() {
        assert_eq!(
            picked_path(&output(0, "/home/me/out\n")),
            Some(PathBuf::from("/home/me/out"))
        );
        assert_eq!(picked_path(&output(0, "  \n")), None);
        assert_eq!(picked_path(&output(1, "/ignored")), None);
    }

    #[test]
    fn test_has_display() {
        let set = Some(OsStr::new(":0"));
        let empty = Some(OsStr::new(""));
        assert!(has_display(set, None));
        assert!(has_display(None, Some(OsStr::new("wayland-0"))));
        assert!(has_display(empty, set));
        assert!(!has_display(None, None));
        assert!(!has_display(empty, empty));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_picker_unavailable_without_display() {
        let headless = !has_display(
            std::env::var_os("DISPLAY").as_deref(),
            std::env::var_os("WAYLAND_DISPLAY").as_deref(),
        );
        if headless {
            assert!(matches!(
                SystemDesktop.pick_folder(Path::new("/tmp")),
                Err(DesktopError::EnvironmentUnavailable)
            ));
        }
    }

    #[test]
    fn test_picker_commands_exist_for_platform() {
        assert!(!picker_commands(Path::new("/tmp")).is_empty());
    }

    struct FailingDesktop;

    impl Desktop for FailingDesktop {
        fn pick_folder(&self, _initial: &Path) -> Result<Option<PathBuf>, DesktopError> {
            Err(DesktopError::EnvironmentUnavailable)
        }

        fn open(&self, target: &str) -> Result<(), DesktopError> {
            Err(DesktopError::OpenFailed {
                target: target.to_string(),
                reason: "no display".to_string(),
            })
        }
    }

    #[test]
    fn test_open_browser_swallows_errors() {
        open_browser(&FailingDesktop, "http://127.0.0.1:7860");
    }
}
