//! Alert sinks used by the server.
//!
//! | Sink | Channels | Delivers to |
//! |------|----------|-------------|
//! | [`LogSink`] | notification | the process log |
//! | [`BroadcastSink`] | audio, notification, haptic | WebSocket clients, who play the siren, show the notification and vibrate |
//! | [`FlashSink`] | flash | [`FlashDriver`], which streams on/off frames |
//! | [`CommandSink`] | notification | an external command such as `notify-send` |

use log::{debug, error, info, warn};
use shorewatch_core::{
    AlertChannels, AlertEvent, AlertPresentation, AlertSink, Severity, SinkError,
};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::flash::FlashDriver;
use crate::AlertFrame;

/// Writes the notification text to the log, at a level matching the severity
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn channel(&self) -> AlertChannels {
        AlertChannels::NOTIFICATION
    }

    fn deliver(&self, _event: &AlertEvent, presentation: &AlertPresentation) -> Result<(), SinkError> {
        let n = &presentation.notification;
        match presentation.severity {
            Severity::Critical => error!("{}: {}", n.title, n.body),
            Severity::Warning => warn!("{}: {}", n.title, n.body),
            Severity::Info => info!("{}: {}", n.title, n.body),
        }
        Ok(())
    }
}

/// Streams alerts to WebSocket clients
pub struct BroadcastSink {
    tx_frames: broadcast::Sender<AlertFrame>,
    channels: AlertChannels,
}

impl BroadcastSink {
    pub fn new(tx_frames: broadcast::Sender<AlertFrame>, enabled: AlertChannels) -> Self {
        BroadcastSink {
            tx_frames,
            channels: enabled & (AlertChannels::AUDIO | AlertChannels::NOTIFICATION | AlertChannels::HAPTIC),
        }
    }
}

impl AlertSink for BroadcastSink {
    fn name(&self) -> &str {
        "websocket"
    }

    fn channel(&self) -> AlertChannels {
        self.channels
    }

    fn deliver(&self, event: &AlertEvent, presentation: &AlertPresentation) -> Result<(), SinkError> {
        let frame = AlertFrame::Alert {
            event: event.clone(),
            presentation: presentation.clone(),
        };
        match self.tx_frames.send(frame) {
            Ok(receivers) => {
                debug!("Alert sent to {} websocket clients", receivers);
                Ok(())
            }
            Err(_) => Err(SinkError::Unavailable("no websocket clients connected".to_string())),
        }
    }
}

/// Hands the flash request to the [`FlashDriver`]
pub struct FlashSink {
    driver: FlashDriver,
}

impl FlashSink {
    pub fn new(driver: FlashDriver) -> Self {
        FlashSink { driver }
    }
}

impl AlertSink for FlashSink {
    fn name(&self) -> &str {
        "flash"
    }

    fn channel(&self) -> AlertChannels {
        AlertChannels::FLASH
    }

    fn deliver(&self, _event: &AlertEvent, presentation: &AlertPresentation) -> Result<(), SinkError> {
        if self.driver.is_stopped() {
            return Err(SinkError::Unavailable("flash driver stopped".to_string()));
        }
        // Runs on its own; the dispatcher does not wait for it
        let _ = self.driver.start(presentation.flash.clone());
        Ok(())
    }
}

/// How long a notification command may run before it is killed
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

const COMMAND_POLL: Duration = Duration::from_millis(20);

/// Runs `<program> [args..] <title> <body>` for every notification, killing
/// the command if it outlives its timeout
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSink {
    /// Split a command line such as `notify-send -u critical` on whitespace
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(CommandSink {
            program,
            args: parts.collect(),
            timeout: COMMAND_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl AlertSink for CommandSink {
    fn name(&self) -> &str {
        &self.program
    }

    fn channel(&self) -> AlertChannels {
        AlertChannels::NOTIFICATION
    }

    fn deliver(&self, _event: &AlertEvent, presentation: &AlertPresentation) -> Result<(), SinkError> {
        let n = &presentation.notification;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&n.title)
            .arg(&n.body)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SinkError::Unavailable(format!("{} not found", self.program)),
                std::io::ErrorKind::PermissionDenied => SinkError::PermissionDenied(self.program.clone()),
                _ => SinkError::Failed(e.to_string()),
            })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(SinkError::Failed(format!("{} exited with {}", self.program, status)))
                }
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SinkError::Failed(format!(
                        "{} killed after {:?}",
                        self.program, self.timeout
                    )));
                }
                Ok(None) => std::thread::sleep(COMMAND_POLL),
                Err(e) => return Err(SinkError::Failed(e.to_string())),
            }
        }
    }
}
