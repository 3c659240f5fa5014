//! Windows Scheduled Task definition XML.
//!
//! Task definitions are small single documents, so this is the one XML
//! parser that deserializes the whole file instead of streaming tokens.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::cancel::CancelToken;
use crate::event::Event;
use crate::parser::cache::HeaderCache;
use crate::parser::timestamp;
use crate::parser::traits::{extension_lower, source_label, EventParser, ParseError};

pub const REGISTRATION: &str = "ScheduledTask:Registration";
pub const ACTION: &str = "ScheduledTask:Action";
pub const COM_HANDLER: &str = "ScheduledTask:COMHandler";

pub const TASK_SCHEMA_URL: &str = "http://schemas.microsoft.com/windows/2004/02/mit/task";

/// Trigger event ids start above the action range.
const TRIGGER_ID_BASE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct TaskDocument {
    registration_info: RegistrationInfo,
    triggers: Triggers,
    principals: Principals,
    settings: TaskSettings,
    actions: Actions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RegistrationInfo {
    date: String,
    author: String,
    description: String,
    #[serde(rename = "URI")]
    uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Triggers {
    logon_trigger: Vec<Trigger>,
    boot_trigger: Vec<Trigger>,
    calendar_trigger: Vec<Trigger>,
    time_trigger: Vec<Trigger>,
    event_trigger: Vec<Trigger>,
    registration_trigger: Vec<Trigger>,
    idle_trigger: Vec<Trigger>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Trigger {
    enabled: String,
    start_boundary: String,
    user_id: String,
    delay: String,
    subscription: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Principals {
    principal: Vec<Principal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Principal {
    user_id: String,
    group_id: String,
    run_level: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct TaskSettings {
    enabled: String,
    hidden: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Actions {
    exec: Vec<ExecAction>,
    com_handler: Vec<ComHandlerAction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ExecAction {
    command: String,
    arguments: String,
    working_directory: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ComHandlerAction {
    class_id: String,
    data: String,
}

pub struct ScheduledTaskParser;

impl EventParser for ScheduledTaskParser {
    fn can_parse(&self, path: &Path, cache: &HeaderCache) -> bool {
        if extension_lower(path) != "xml" {
            return false;
        }
        cache.header_contains(path, &[TASK_SCHEMA_URL])
            || (cache.header_contains(path, &["<Task"])
                && (cache.header_contains(path, &["<RegistrationInfo"])
                    || cache.header_contains(path, &["<Actions"])))
    }

    fn parse(&self, path: &Path, _cancel: &CancelToken) -> Result<Vec<Event>, ParseError> {
        let source = source_label(path);
        let path_str = path.to_string_lossy().into_owned();

        let contents = fs::read_to_string(path).map_err(|e| ParseError::open(path, e))?;
        let task: TaskDocument = quick_xml::de::from_str(&contents)
            .map_err(|e| ParseError::malformed("scheduled task XML", path, e.to_string()))?;

        let ts = timestamp::parse_flexible(&task.registration_info.date)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let user = if !task.registration_info.author.is_empty() {
            task.registration_info.author.clone()
        } else {
            task.principals
                .principal
                .first()
                .map(|p| {
                    if p.user_id.is_empty() {
                        p.group_id.clone()
                    } else {
                        p.user_id.clone()
                    }
                })
                .unwrap_or_default()
        };

        let mut events = vec![Event::new(
            ts,
            source.clone(),
            REGISTRATION,
            0,
            user.clone(),
            "",
            registration_message(&task),
            path_str.clone(),
        )];

        for (index, exec) in task.actions.exec.iter().enumerate() {
            events.push(Event::new(
                ts,
                source.clone(),
                ACTION,
                index as i64 + 1,
                user.clone(),
                "",
                exec_message(exec, &task.registration_info.uri),
                path_str.clone(),
            ));
        }

        for (index, com) in task.actions.com_handler.iter().enumerate() {
            events.push(Event::new(
                ts,
                source.clone(),
                COM_HANDLER,
                index as i64 + 1,
                user.clone(),
                "",
                format!("COM Handler ClassId: {} | Data: {}", com.class_id, com.data),
                path_str.clone(),
            ));
        }

        let mut trigger_id = TRIGGER_ID_BASE;
        let trigger_groups: [(&str, &[Trigger], fn(&Trigger) -> String); 7] = [
            ("LogonTrigger", &task.triggers.logon_trigger, logon_trigger_message),
            ("BootTrigger", &task.triggers.boot_trigger, boot_trigger_message),
            ("CalendarTrigger", &task.triggers.calendar_trigger, boundary_trigger_message("Calendar")),
            ("TimeTrigger", &task.triggers.time_trigger, boundary_trigger_message("Time")),
            ("EventTrigger", &task.triggers.event_trigger, event_trigger_message),
            ("RegistrationTrigger", &task.triggers.registration_trigger, boundary_trigger_message("Registration")),
            ("IdleTrigger", &task.triggers.idle_trigger, boundary_trigger_message("Idle")),
        ];
        for (kind, triggers, describe) in trigger_groups {
            for trigger in triggers {
                events.push(Event::new(
                    ts,
                    source.clone(),
                    format!("ScheduledTask:{kind}"),
                    trigger_id,
                    user.clone(),
                    "",
                    describe(trigger),
                    path_str.clone(),
                ));
                trigger_id += 1;
            }
        }

        info!(file = %path.display(), events = events.len(), "parsed scheduled task XML");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "scheduled-task"
    }
}

fn registration_message(task: &TaskDocument) -> String {
    let mut parts = Vec::new();
    let info = &task.registration_info;
    if !info.uri.is_empty() {
        parts.push(format!("URI: {}", info.uri));
    }
    if !info.author.is_empty() {
        parts.push(format!("Author: {}", info.author));
    }
    if !info.description.is_empty() {
        let mut desc = info.description.clone();
        if desc.len() > 100 {
            desc.truncate(97);
            desc.push_str("...");
        }
        parts.push(format!("Description: {desc}"));
    }
    if let Some(principal) = task.principals.principal.first() {
        if !principal.run_level.is_empty() {
            parts.push(format!("RunLevel: {}", principal.run_level));
        }
    }
    if !task.settings.enabled.is_empty() {
        parts.push(format!("Enabled: {}", task.settings.enabled));
    }
    if !task.settings.hidden.is_empty() {
        parts.push(format!("Hidden: {}", task.settings.hidden));
    }
    parts.join(" | ")
}

fn exec_message(exec: &ExecAction, uri: &str) -> String {
    let mut parts = Vec::new();
    if !uri.is_empty() {
        parts.push(format!("Task: {uri}"));
    }
    if !exec.command.is_empty() {
        parts.push(format!("Command: {}", exec.command));
    }
    if !exec.arguments.is_empty() {
        let mut args = exec.arguments.clone();
        if args.len() > 200 {
            args.truncate(197);
            args.push_str("...");
        }
        parts.push(format!("Arguments: {args}"));
    }
    if !exec.working_directory.is_empty() {
        parts.push(format!("WorkingDir: {}", exec.working_directory));
    }
    parts.join(" | ")
}

fn logon_trigger_message(trigger: &Trigger) -> String {
    let mut msg = format!(
        "Logon Trigger | Enabled: {} | StartBoundary: {}",
        trigger.enabled, trigger.start_boundary
    );
    if !trigger.user_id.is_empty() {
        msg.push_str(&format!(" | UserId: {}", trigger.user_id));
    }
    msg
}

fn boot_trigger_message(trigger: &Trigger) -> String {
    format!(
        "Boot Trigger | Enabled: {} | Delay: {}",
        trigger.enabled, trigger.delay
    )
}

fn event_trigger_message(trigger: &Trigger) -> String {
    format!(
        "Event Trigger | Enabled: {} | Subscription: {}",
        trigger.enabled, trigger.subscription
    )
}

fn boundary_trigger_message(kind: &'static str) -> fn(&Trigger) -> String {
    match kind {
        "Calendar" => |t| format!("Calendar Trigger | Enabled: {} | StartBoundary: {}", t.enabled, t.start_boundary),
        "Time" => |t| format!("Time Trigger | Enabled: {} | StartBoundary: {}", t.enabled, t.start_boundary),
        "Registration" => |t| format!("Registration Trigger | Enabled: {} | StartBoundary: {}", t.enabled, t.start_boundary),
        _ => |t| format!("Idle Trigger | Enabled: {} | StartBoundary: {}", t.enabled, t.start_boundary),
    }
}
