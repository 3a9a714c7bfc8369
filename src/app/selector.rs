use super::playlist::Video;
use super::schedule::EpochMs;

/// New records are always due; reviewed ones once their time has come.
pub(crate) fn is_due(video: &Video, now: EpochMs) -> bool {
    video.review_count == 0 || video.next_review <= now
}

pub(crate) fn any_needs_review(list: &[Video], now: EpochMs) -> bool {
    list.iter().any(|video| is_due(video, now))
}

pub(crate) fn due_count(list: &[Video], now: EpochMs) -> usize {
    list.iter().filter(|video| is_due(video, now)).count()
}

/// Picks the due record with the earliest `next_review`, skipping `exclude_id`.
/// Ties keep list order.
pub(crate) fn select_next<'a>(
    list: &'a [Video],
    exclude_id: Option<&str>,
    now: EpochMs,
) -> Option<&'a Video> {
    list.iter()
        .filter(|video| exclude_id != Some(video.id.as_str()))
        .filter(|video| is_due(video, now))
        .fold(None, |best: Option<&Video>, video| match best {
            Some(current) if current.next_review <= video.next_review => Some(current),
            _ => Some(video),
        })
}

pub(crate) fn sorted_by_next_review(list: &[Video]) -> Vec<Video> {
    let mut sorted = list.to_vec();
    sorted.sort_by_key(|video| video.next_review);
    sorted
}
