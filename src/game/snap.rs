use crate::game::time::GlobalPosition;
use num_traits::ToPrimitive;

/// Roles of the snap indicator lamps. The physical pin behind each role comes
/// from the hardware `PinLayout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapPin {
    T4 = 0,
    T8,
    T16,
    T12,
    T24,
    T192,
}

impl SnapPin {
    pub const ALL: [SnapPin; 6] = [
        SnapPin::T4,
        SnapPin::T8,
        SnapPin::T16,
        SnapPin::T12,
        SnapPin::T24,
        SnapPin::T192,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Snap {
    Q4th = 0,
    Q8th,
    Q12th,
    Q16th,
    Q24th,
    Q32nd,
    Q48th,
    Q64th,
    Q192nd,
}

struct SnapEntry {
    snap: Snap,
    value: u32,
    color: [u8; 3],
    pins: &'static [SnapPin],
}

// Indexed by `Snap as usize`.
const SNAP_TABLE: [SnapEntry; 9] = [
    SnapEntry { snap: Snap::Q4th, value: 4, color: [255, 0, 0], pins: &[SnapPin::T4] },
    SnapEntry { snap: Snap::Q8th, value: 8, color: [0, 0, 255], pins: &[SnapPin::T8] },
    SnapEntry { snap: Snap::Q12th, value: 12, color: [120, 0, 255], pins: &[SnapPin::T12] },
    SnapEntry { snap: Snap::Q16th, value: 16, color: [255, 255, 0], pins: &[SnapPin::T16] },
    SnapEntry { snap: Snap::Q24th, value: 24, color: [255, 120, 255], pins: &[SnapPin::T24] },
    SnapEntry { snap: Snap::Q32nd, value: 32, color: [255, 120, 0], pins: &[SnapPin::T4, SnapPin::T8] },
    SnapEntry { snap: Snap::Q48th, value: 48, color: [0, 255, 255], pins: &[SnapPin::T4, SnapPin::T12] },
    SnapEntry { snap: Snap::Q64th, value: 64, color: [0, 255, 0], pins: &[SnapPin::T4, SnapPin::T16] },
    SnapEntry { snap: Snap::Q192nd, value: 192, color: [120, 120, 120], pins: &[SnapPin::T12, SnapPin::T16] },
];

impl Snap {
    /// Maps a reduced measure denominator to its subdivision. Denominators
    /// outside the table fall into the 192nd catch-all.
    pub const fn from_denominator(denominator: u64) -> Self {
        match denominator {
            1 | 2 | 4 => Snap::Q4th,
            3 | 12 => Snap::Q12th,
            8 => Snap::Q8th,
            16 => Snap::Q16th,
            24 => Snap::Q24th,
            32 => Snap::Q32nd,
            48 => Snap::Q48th,
            64 => Snap::Q64th,
            _ => Snap::Q192nd,
        }
    }

    #[inline(always)]
    fn entry(self) -> &'static SnapEntry {
        &SNAP_TABLE[self as usize]
    }

    #[inline(always)]
    pub fn value(self) -> u32 {
        self.entry().value
    }

    #[inline(always)]
    pub fn color(self) -> [u8; 3] {
        self.entry().color
    }

    #[inline(always)]
    pub fn pin_roles(self) -> &'static [SnapPin] {
        self.entry().pins
    }
}

/// Snap of a chart position, from its reduced denominator.
pub fn classify(position: &GlobalPosition) -> Snap {
    let denominator = position.denominator().to_u64().unwrap_or(u64::MAX);
    Snap::from_denominator(denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::time::ratio;

    fn at(numer: i64, denom: i64) -> Snap {
        classify(&GlobalPosition::new(ratio(numer, denom)).unwrap())
    }

    #[test]
    fn table_is_indexed_by_variant() {
        for (i, entry) in SNAP_TABLE.iter().enumerate() {
            assert_eq!(entry.snap as usize, i);
        }
    }

    #[test]
    fn denominators_map_to_subdivisions() {
        let expected = [
            (1, Snap::Q4th),
            (2, Snap::Q4th),
            (4, Snap::Q4th),
            (3, Snap::Q12th),
            (8, Snap::Q8th),
            (12, Snap::Q12th),
            (16, Snap::Q16th),
            (24, Snap::Q24th),
            (32, Snap::Q32nd),
            (48, Snap::Q48th),
            (64, Snap::Q64th),
            (192, Snap::Q192nd),
        ];
        for (denominator, snap) in expected {
            assert_eq!(Snap::from_denominator(denominator), snap, "denominator {denominator}");
        }
    }

    #[test]
    fn unknown_denominators_fall_back_to_192nd() {
        for denominator in [5, 6, 7, 40, 96, 1000] {
            assert_eq!(Snap::from_denominator(denominator), Snap::Q192nd);
        }
    }

    #[test]
    fn classification_uses_the_reduced_fraction() {
        assert_eq!(at(0, 1), Snap::Q4th);
        assert_eq!(at(6, 8), Snap::Q4th);
        assert_eq!(at(13, 8), Snap::Q8th);
        assert_eq!(at(4, 12), Snap::Q12th);
        assert_eq!(at(10, 48), Snap::Q24th);
        assert_eq!(at(1, 7), Snap::Q192nd);
    }

    #[test]
    fn colors_and_pins_come_from_one_table() {
        assert_eq!(Snap::Q4th.color(), [255, 0, 0]);
        assert_eq!(Snap::Q12th.color(), [120, 0, 255]);
        assert_eq!(Snap::Q192nd.color(), [120, 120, 120]);
        assert_eq!(Snap::Q32nd.pin_roles(), &[SnapPin::T4, SnapPin::T8]);
        assert_eq!(Snap::Q48th.pin_roles(), &[SnapPin::T4, SnapPin::T12]);
        assert_eq!(Snap::Q64th.pin_roles(), &[SnapPin::T4, SnapPin::T16]);
        assert_eq!(Snap::Q192nd.pin_roles(), &[SnapPin::T12, SnapPin::T16]);
        assert_eq!(Snap::Q24th.value(), 24);
    }
}
