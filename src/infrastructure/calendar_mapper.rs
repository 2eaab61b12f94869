use crate::domain::models::{BlockId, StudyBlock, StudyBlockPatch, StudyBlockStatus};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Calendar-library shaped event. `resource` carries the block it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: BlockId,
    pub title: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// Display hint only; set when the block has no stored duration.
    pub all_day: bool,
    pub resource: StudyBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPalette {
    pub background: &'static str,
    pub border: &'static str,
}

pub fn block_to_event(
    block: &StudyBlock,
    now: DateTime<Utc>,
    timezone: Tz,
    default_minutes: u32,
) -> CalendarEvent {
    let (start, end) = block.display_range(now, default_minutes);
    CalendarEvent {
        id: block.id,
        title: block.topic.name.clone(),
        start: start.with_timezone(&timezone),
        end: end.with_timezone(&timezone),
        all_day: block.duration_minutes.is_none(),
        resource: block.clone(),
    }
}

/// Translates a drag-and-drop re-time into the block patch to send. Only the
/// start moves; `_new_end` is accepted for signature parity with the calendar
/// callback and intentionally ignored.
pub fn drop_to_patch<Z: chrono::TimeZone>(
    event: &CalendarEvent,
    new_start: DateTime<Z>,
    _new_end: DateTime<Z>,
) -> (BlockId, StudyBlockPatch) {
    (
        event.resource.id,
        StudyBlockPatch::reschedule(new_start.with_timezone(&Utc)),
    )
}

pub fn status_palette(status: StudyBlockStatus) -> EventPalette {
    match status {
        StudyBlockStatus::Completed => EventPalette {
            background: "#10B981",
            border: "#047857",
        },
        StudyBlockStatus::InProgress => EventPalette {
            background: "#3B82F6",
            border: "#1D4ED8",
        },
        StudyBlockStatus::Skipped => EventPalette {
            background: "#EF4444",
            border: "#B91C1C",
        },
        StudyBlockStatus::Planned => EventPalette {
            background: "#8B5CF6",
            border: "#6D28D9",
        },
    }
}
