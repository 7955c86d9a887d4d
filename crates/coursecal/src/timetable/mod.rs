/// Clock and calendar arithmetic shared by all institutions
mod period;
mod week;

pub use period::{PeriodTable, Season, SeasonRule, Slot};
pub use week::{anchor_from_occurrence, resolve, resolve_from, WeekAttendance, ATTEND_MARKER};
