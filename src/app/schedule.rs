use chrono::{DateTime, Local, Utc};
use rand::Rng;

/// Milliseconds since the unix epoch.
pub(crate) type EpochMs = i64;

pub(crate) const DAY_MS: EpochMs = 86_400_000;

/// Day offsets for successive reviews. Counts past the end reuse the last rung.
pub(crate) const INTERVAL_LADDER_DAYS: [i64; 5] = [1, 3, 7, 14, 30];

pub(crate) fn now_ms() -> EpochMs {
    Utc::now().timestamp_millis()
}

pub(crate) fn interval_days(review_count: u32) -> i64 {
    let last = INTERVAL_LADDER_DAYS.len() - 1;
    let rung = usize::try_from(review_count).map_or(last, |count| count.min(last));
    INTERVAL_LADDER_DAYS[rung]
}

pub(crate) fn compute_next_review(review_count: u32, now: EpochMs) -> EpochMs {
    now.saturating_add(interval_days(review_count).saturating_mul(DAY_MS))
}

pub(crate) fn new_video_id(now: EpochMs) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut id = to_base36(u64::try_from(now).unwrap_or(0));
    let mut rng = rand::thread_rng();
    for _ in 0..6 {
        id.push(char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]));
    }
    id
}

pub(crate) fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % 36) as u32;
        digits.push(char::from_digit(digit, 36).unwrap_or('0'));
        value /= 36;
    }
    digits.iter().rev().collect()
}

pub(crate) fn format_due_display(next_review: EpochMs, now: EpochMs) -> String {
    let delta = next_review - now;
    if delta <= 0 {
        return "due now".to_string();
    }

    let hours = delta / 3_600_000;
    let relative = if hours < 1 {
        format!("in {}m", (delta / 60_000).max(1))
    } else if hours < 48 {
        format!("in {hours}h")
    } else {
        format!("in {}d", delta / DAY_MS)
    };

    match format_timestamp(next_review) {
        Some(at) => format!("{at} ({relative})"),
        None => relative,
    }
}

/// Local wall-clock rendering of an epoch timestamp.
pub(crate) fn format_timestamp(at: EpochMs) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(at).map(|at| {
        at.with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    })
}

/// `m:ss`, or `h:mm:ss` past the hour.
pub(crate) fn format_position(seconds: u32) -> String {
    let (hours, minutes, secs) = (seconds / 3600, (seconds / 60) % 60, seconds % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}
