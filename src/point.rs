//! # Lattice Points
//!
//! Integer 3-vectors, the six quarter-turn axis rotations, lattice
//! classification predicates and the unit directions between main points.
//!
//! A *main point* has every coordinate divisible by 3. Main points are the
//! only points that own a local cell; the points in between are reached
//! through connection vectors.

use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

// ============================================================================
// Point
// ============================================================================

/// A lattice point or a vector between two lattice points.
///
/// Addition, subtraction, negation and `mul` wrap at the `i32` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Point(pub [i32; 3]);

/// Distance between two adjacent main points along one axis.
pub const THREE: i32 = 3;

pub const ORIGIN: Point = Point([0, 0, 0]);
pub const X_FIRST: Point = Point([THREE, 0, 0]);
pub const Y_FIRST: Point = Point([0, THREE, 0]);
pub const Z_FIRST: Point = Point([0, 0, THREE]);

impl Point {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self([x, y, z])
    }

    pub fn x(&self) -> i32 { self.0[0] }
    pub fn y(&self) -> i32 { self.0[1] }
    pub fn z(&self) -> i32 { self.0[2] }

    pub fn mul(self, m: i32) -> Self {
        Self(self.0.map(|c| c.wrapping_mul(m)))
    }

    /// Sum of squared components, accumulated in 64 bits.
    pub fn distance_squared(&self) -> i64 {
        self.0.iter().map(|&c| i64::from(c) * i64::from(c)).sum()
    }

    // ========================================================================
    // Rotations
    // ========================================================================

    pub fn rot_plus_x(self) -> Self {
        Self([self.0[0], -self.0[2], self.0[1]])
    }

    pub fn rot_neg_x(self) -> Self {
        Self([self.0[0], self.0[2], -self.0[1]])
    }

    pub fn rot_plus_y(self) -> Self {
        Self([self.0[2], self.0[1], -self.0[0]])
    }

    pub fn rot_neg_y(self) -> Self {
        Self([-self.0[2], self.0[1], self.0[0]])
    }

    pub fn rot_plus_z(self) -> Self {
        Self([-self.0[1], self.0[0], self.0[2]])
    }

    pub fn rot_neg_z(self) -> Self {
        Self([self.0[1], -self.0[0], self.0[2]])
    }

    // ========================================================================
    // Classification
    // ========================================================================

    pub fn is_main_point(&self) -> bool {
        self.0.iter().all(|c| c % THREE == 0)
    }

    /// Coordinates in {-1, 0, 1} with squared distance 2.
    pub fn is_base_connecting_vector(&self) -> bool {
        self.0.iter().all(|c| c.abs() <= 1) && self.distance_squared() == 2
    }

    /// Coordinates in {-2..=2} with squared distance in {1, 2, 3, 5}.
    pub fn is_connection_vector(&self) -> bool {
        self.0.iter().all(|c| c.abs() <= 2)
            && matches!(self.distance_squared(), 1 | 2 | 3 | 5)
    }

    /// Closest main point, rounding each coordinate independently.
    /// `i32::MIN` has no main point below it and rounds up to `i32::MIN + 2`.
    pub fn nearest_main_point(&self) -> Self {
        let mut res = *self;
        for c in res.0.iter_mut() {
            *c = match *c % THREE {
                1 => *c - 1,
                -2 => c.checked_sub(1).unwrap_or(*c + 2),
                2 | -1 => *c + 1,
                _ => *c,
            };
        }
        res
    }

    /// Number of main-point hops from the origin: sum of `|c| / 3`.
    /// Only meaningful for main points.
    pub fn cell_distance(&self) -> i64 {
        self.0.iter().map(|&c| i64::from(c.unsigned_abs() / THREE as u32)).sum()
    }

    /// 32-bit mixing hash used by [`crate::index::ConcurrentPointIndex`].
    pub fn mix_hash(&self) -> u32 {
        murmur3_u32(&[self.0[0] as u32, self.0[1] as u32, self.0[2] as u32])
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point(std::array::from_fn(|i| self.0[i].wrapping_add(rhs.0[i])))
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point(std::array::from_fn(|i| self.0[i].wrapping_sub(rhs.0[i])))
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point(self.0.map(i32::wrapping_neg))
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {}]", self.0[0], self.0[1], self.0[2])
    }
}

// ============================================================================
// Murmur3 mixing
// ============================================================================

/// Murmur3 (32-bit, seed 0) over a slice of words, without the length mix.
pub fn murmur3_u32(words: &[u32]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1: u32 = 0;
    for &word in words {
        let mut k1 = word.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

// ============================================================================
// Unit directions
// ============================================================================

/// The six axis directions between neighboring main points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitDirection {
    PlusX = 0,
    MinusX = 1,
    PlusY = 2,
    MinusY = 3,
    PlusZ = 4,
    MinusZ = 5,
}

impl UnitDirection {
    pub const ALL: [UnitDirection; 6] = [
        UnitDirection::PlusX,
        UnitDirection::MinusX,
        UnitDirection::PlusY,
        UnitDirection::MinusY,
        UnitDirection::PlusZ,
        UnitDirection::MinusZ,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// 0 for X, 1 for Y, 2 for Z.
    pub fn axis(self) -> usize {
        self.index() / 2
    }

    /// +1 for the plus directions, -1 for the minus ones.
    pub fn sign(self) -> i32 {
        if self.index() % 2 == 0 { 1 } else { -1 }
    }

    pub fn from_axis(axis: usize, positive: bool) -> Self {
        Self::ALL[axis * 2 + usize::from(!positive)]
    }

    pub fn opposite(self) -> Self {
        Self::ALL[self.index() ^ 1]
    }

    /// The neighboring main point in this direction, seen from the origin.
    pub fn first_point(self) -> Point {
        let mut res = [0; 3];
        res[self.axis()] = THREE * self.sign();
        Point(res)
    }
}

impl fmt::Display for UnitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitDirection::PlusX => "+X",
            UnitDirection::MinusX => "-X",
            UnitDirection::PlusY => "+Y",
            UnitDirection::MinusY => "-Y",
            UnitDirection::PlusZ => "+Z",
            UnitDirection::MinusZ => "-Z",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rotations_are_quarter_turns() {
        let p = Point::new(1, 2, 3);
        assert_eq!(p.rot_plus_x(), Point::new(1, -3, 2));
        assert_eq!(p.rot_neg_x(), Point::new(1, 3, -2));
        assert_eq!(p.rot_plus_y(), Point::new(3, 2, -1));
        assert_eq!(p.rot_neg_y(), Point::new(-3, 2, 1));
        assert_eq!(p.rot_plus_z(), Point::new(-2, 1, 3));
        assert_eq!(p.rot_neg_z(), Point::new(2, -1, 3));
    }

    #[test]
    fn test_nearest_main_point() {
        assert_eq!(Point::new(0, 1, 2).nearest_main_point(), Point::new(0, 0, 3));
        assert_eq!(Point::new(-1, -2, -3).nearest_main_point(), Point::new(0, -3, -3));
        assert_eq!(Point::new(4, 5, 7).nearest_main_point(), Point::new(3, 6, 6));
    }

    #[test]
    fn test_extreme_coordinates() {
        let low = Point::new(i32::MIN, i32::MAX, 0);
        assert_eq!(low.nearest_main_point(), Point::new(i32::MIN + 2, i32::MAX - 1, 0));
        assert_eq!(low + Point::new(-1, 1, 0), Point::new(i32::MAX, i32::MIN, 0));
        assert_eq!(low - Point::new(1, -1, 0), Point::new(i32::MAX, i32::MIN, 0));
        assert_eq!(-low, Point::new(i32::MIN, -i32::MAX, 0));
        assert_eq!(Point::new(i32::MIN, 0, 0).cell_distance(), 715_827_882);
    }

    #[test]
    fn test_classifiers() {
        assert!(Point::new(1, 1, 0).is_base_connecting_vector());
        assert!(!Point::new(1, 0, 0).is_base_connecting_vector());
        assert!(Point::new(2, 1, 0).is_connection_vector());
        assert!(Point::new(1, 1, 1).is_connection_vector());
        assert!(!Point::new(2, 2, 0).is_connection_vector());
        assert!(!ORIGIN.is_connection_vector());
        assert!(Point::new(-3, 6, 0).is_main_point());
        assert!(!Point::new(-3, 6, 1).is_main_point());
    }

    #[test]
    fn test_cell_distance() {
        assert_eq!(ORIGIN.cell_distance(), 0);
        assert_eq!(Point::new(-3, 6, 9).cell_distance(), 6);
    }

    #[test]
    fn test_unit_directions() {
        for ud in UnitDirection::ALL {
            assert_eq!(ud.opposite().opposite(), ud);
            assert_eq!(ud.first_point(), -ud.opposite().first_point());
            assert_eq!(UnitDirection::from_axis(ud.axis(), ud.sign() > 0), ud);
        }
        assert_eq!(UnitDirection::MinusY.first_point(), Point::new(0, -3, 0));
    }

    #[test]
    fn test_hash_distinguishes_neighbors() {
        assert_ne!(Point::new(1, 0, 0).mix_hash(), Point::new(0, 1, 0).mix_hash());
        assert_eq!(Point::new(4, -5, 6).mix_hash(), Point::new(4, -5, 6).mix_hash());
    }

    fn any_point() -> impl Strategy<Value = Point> {
        (-1000i32..1000, -1000i32..1000, -1000i32..1000).prop_map(|(x, y, z)| Point::new(x, y, z))
    }

    proptest! {
        #[test]
        fn prop_four_rotations_are_identity(p in any_point()) {
            prop_assert_eq!(p.rot_plus_x().rot_plus_x().rot_plus_x().rot_plus_x(), p);
            prop_assert_eq!(p.rot_neg_x().rot_neg_x().rot_neg_x().rot_neg_x(), p);
            prop_assert_eq!(p.rot_plus_y().rot_plus_y().rot_plus_y().rot_plus_y(), p);
            prop_assert_eq!(p.rot_neg_y().rot_neg_y().rot_neg_y().rot_neg_y(), p);
            prop_assert_eq!(p.rot_plus_z().rot_plus_z().rot_plus_z().rot_plus_z(), p);
            prop_assert_eq!(p.rot_neg_z().rot_neg_z().rot_neg_z().rot_neg_z(), p);
        }

        #[test]
        fn prop_rotation_inverse(p in any_point()) {
            prop_assert_eq!(p.rot_plus_x().rot_neg_x(), p);
            prop_assert_eq!(p.rot_plus_y().rot_neg_y(), p);
            prop_assert_eq!(p.rot_plus_z().rot_neg_z(), p);
        }

        #[test]
        fn prop_nearest_main_point_over_full_range(x in any::<i32>(), y in any::<i32>(), z in any::<i32>()) {
            let m = Point::new(x, y, z).nearest_main_point();
            prop_assert!(m.is_main_point());
            for (a, b) in m.0.iter().zip([x, y, z]) {
                prop_assert!((i64::from(*a) - i64::from(b)).abs() <= 2);
            }
        }

        #[test]
        fn prop_nearest_main_point_idempotent(p in any_point()) {
            let m = p.nearest_main_point();
            prop_assert!(m.is_main_point());
            prop_assert_eq!(m.nearest_main_point(), m);
            prop_assert!((p - m).0.iter().all(|c| c.abs() <= 1));
        }

        #[test]
        fn prop_main_point_is_fixed(x in -300i32..300, y in -300i32..300, z in -300i32..300) {
            let p = Point::new(x, y, z).mul(THREE);
            prop_assert_eq!(p.nearest_main_point(), p);
        }
    }
}
