use super::segment::WordTiming;

/// Slack before a word's start, in seconds. Absorbs timer jitter so the
/// highlight does not flicker at word boundaries.
pub const START_EPSILON: f64 = 0.03;
/// Slack after a word's end, in seconds.
pub const END_EPSILON: f64 = 0.03;

/// Index of the word being spoken at `t`, or `None` in a gap, before the
/// first word or after the last. O(log W).
pub fn active_word_index(timings: &[WordTiming], t: f64) -> Option<usize> {
    if !t.is_finite() {
        return None;
    }
    // Greatest i with start[i] <= t + START_EPSILON
    let upper = timings.partition_point(|w| w.start <= t + START_EPSILON);
    let i = upper.checked_sub(1)?;
    let word = &timings[i];

    let end = if word.end.is_finite() {
        word.end
    } else {
        timings.get(i + 1).map(|next| next.start).unwrap_or(f64::INFINITY)
    };

    (word.start - START_EPSILON <= t && t <= end + END_EPSILON).then_some(i)
}
