//! Small formatting helpers shared across commands.

/// Zero-fill `current` to the width of `possible_max`.
///
/// Keeps generated ids and progress counters lexicographically sortable.
pub fn padded(current: u64, possible_max: u64) -> String {
    let width = possible_max.to_string().len();
    format!("{:0width$}", current, width = width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_width_of_max() {
        assert_eq!(padded(3, 100), "003");
        assert_eq!(padded(42, 100), "042");
        assert_eq!(padded(100, 100), "100");
    }

    #[test]
    fn single_digit_max_needs_no_padding() {
        assert_eq!(padded(3, 9), "3");
    }
}
