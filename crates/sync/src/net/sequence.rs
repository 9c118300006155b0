/// Signed distance from `b` forward to `a` on the 16-bit sequence ring.
pub fn sequence_distance(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

pub fn sequence_greater_than(a: u16, b: u16) -> bool {
    sequence_distance(a, b) > 0
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_sequence_greater_than() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u16::MAX));
        assert!(!sequence_greater_than(u16::MAX, 0));
        assert!(!sequence_greater_than(7, 7));
    }

    #[test]
    fn test_distance_across_wrap() {
        assert_eq!(sequence_distance(0x0001, 0xFFFF), 2);
        assert_eq!(sequence_distance(0xFFFF, 0x0001), -2);
        assert_eq!(sequence_distance(100, 40), 60);
    }

    proptest! {
        #[test]
        fn prop_distance_matches_modular_arithmetic(a: u16, b: u16) {
            let forward = (a as i32 - b as i32).rem_euclid(65536);
            let expected = if forward >= 32768 { forward - 65536 } else { forward };
            prop_assert_eq!(sequence_distance(a, b) as i32, expected);
            prop_assert_eq!(b.wrapping_add(sequence_distance(a, b) as u16), a);
        }

        #[test]
        fn prop_greater_than_is_antisymmetric(a: u16, b: u16) {
            prop_assume!(a.wrapping_sub(b) != 0x8000);
            prop_assert_eq!(sequence_greater_than(a, b), a != b && !sequence_greater_than(b, a));
        }
    }
}
