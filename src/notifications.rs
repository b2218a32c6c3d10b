//! System notifications for timer and goal events.

use crate::models::TimerPhase;
use log::{debug, info, warn};
use notify_rust::Notification;
use std::thread;

const APP_NAME: &str = "studytimer";

/// Whether notifications may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    /// Not asked yet.
    #[default]
    Default,
    Granted,
    Denied,
}

/// Notification sender gated by a permission decision.
#[derive(Debug, Clone)]
pub struct Notifier {
    permission: Permission,
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            permission: Permission::Default,
            enabled,
        }
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    /// Resolves the permission the first time it is needed.
    ///
    /// Desktop notification daemons have no consent prompt, so the user's
    /// notification preference stands in for the answer.
    pub fn request_permission(&mut self) {
        if self.permission == Permission::Default {
            self.permission = if self.enabled {
                Permission::Granted
            } else {
                Permission::Denied
            };
            info!("Notification permission {:?}", self.permission);
        }
    }

    /// Updates the preference. A changed preference re-decides the permission.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            if self.permission != Permission::Default {
                self.permission = Permission::Default;
                self.request_permission();
            }
        }
    }

    /// Shows a notification unless permission was denied or never asked.
    pub fn notify(&self, summary: &str, body: &str) {
        if self.permission != Permission::Granted {
            debug!("Notification suppressed ({:?}): {}", self.permission, summary);
            return;
        }
        show(summary, body);
    }
}

/// Shows a notification on a background thread so the caller never blocks.
pub fn show(summary: &str, body: &str) {
    let summary = summary.to_string();
    let body = body.to_string();
    thread::spawn(move || {
        if let Err(e) = Notification::new()
            .appname(APP_NAME)
            .summary(&summary)
            .body(&body)
            .show()
        {
            warn!("Failed to show notification: {}", e);
        }
    });
}

/// Title and body announcing the end of a phase.
pub fn phase_complete_message(phase: TimerPhase, goal: &str) -> (String, String) {
    match phase {
        TimerPhase::Work => {
            let body = if goal.trim().is_empty() {
                "Great work! Time for a break.".to_string()
            } else {
                format!("Great work on \"{}\"! Time for a break.", goal)
            };
            ("Study session complete! 📚".to_string(), body)
        }
        TimerPhase::Break => (
            "Break over! ☕".to_string(),
            "Ready to start another study session?".to_string(),
        ),
    }
}

/// Title and body for the five-minute warning.
pub fn warning_message() -> (String, String) {
    (
        "5 minutes left ⏳".to_string(),
        "Start wrapping up your current task.".to_string(),
    )
}

/// Title and body for a goal that starts soon.
pub fn goal_soon_message(title: &str, minutes_until: i64) -> (String, String) {
    let body = if minutes_until == 1 {
        format!("\"{}\" starts in 1 minute.", title)
    } else {
        format!("\"{}\" starts in {} minutes.", title, minutes_until)
    };
    ("Study goal starting soon".to_string(), body)
}

/// Title and body for a goal whose start time has arrived.
pub fn goal_start_message(title: &str) -> (String, String) {
    (
        "Time to study! 🎯".to_string(),
        format!("\"{}\" is scheduled to start now. Ready to begin?", title),
    )
}
