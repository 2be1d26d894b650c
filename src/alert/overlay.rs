//! Surfaces that render the full-screen intervention.

use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "overlay";

/// Show/hide of the blocking overlay. Both calls must be cheap and must
/// not block; they run on the capture context.
pub trait OverlaySurface: Send {
    fn show(&mut self);
    fn hide(&mut self);
}

impl OverlaySurface for Box<dyn OverlaySurface> {
    fn show(&mut self) {
        (**self).show();
    }

    fn hide(&mut self) {
        (**self).hide();
    }
}

/// Only records transitions in the log.
#[derive(Debug, Default)]
pub struct LogOverlay;

impl OverlaySurface for LogOverlay {
    fn show(&mut self) {
        log_warn!("intervention overlay shown");
    }

    fn hide(&mut self) {
        log_info!("intervention overlay hidden");
    }
}

/// Launches an external full-screen blocker while shown and kills it on hide.
pub struct CommandOverlay {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl CommandOverlay {
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            child: None,
        })
    }
}

impl OverlaySurface for CommandOverlay {
    fn show(&mut self) {
        if self.child.is_some() {
            return;
        }
        match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => {
                log_info!("overlay process started (pid {:?})", child.id());
                self.child = Some(child);
            }
            Err(err) => log_error!("failed to launch overlay {}: {err}", self.program),
        }
    }

    fn hide(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.start_kill() {
                log_warn!("failed to stop overlay process: {err}");
            }
        }
    }
}

impl Drop for CommandOverlay {
    fn drop(&mut self) {
        self.hide();
    }
}
