/// Which cancelled bookings must go so that at most `cap` remain.
///
/// `cancelled_oldest_first` must already be in eviction order (oldest
/// `cancelled_at` first, ties by id). The result is its prefix of length
/// `len - cap`, or empty when the set fits.
pub fn eviction_targets<T>(cancelled_oldest_first: &[T], cap: usize) -> &[T] {
    let excess = cancelled_oldest_first.len().saturating_sub(cap);
    &cancelled_oldest_first[..excess]
}
