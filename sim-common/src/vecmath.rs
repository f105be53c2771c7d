use serde::{Deserialize, Serialize};

/// A 2D vector in simulation units, stored as `f32` like the `.sim` records.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    /// Squared distance from the origin, accumulated in `f64`.
    pub fn norm_squared(&self) -> f64 {
        let x = self.x as f64;
        let y = self.y as f64;
        x * x + y * y
    }

    /// Distance from the origin (the container centre).
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Squared distance to another point, accumulated in `f64`.
    pub fn distance_squared(&self, other: Vec2) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        dx * dx + dy * dy
    }

    /// Unit vector pointing away from the origin, `None` at the origin itself.
    pub fn radial_unit(&self) -> Option<(f64, f64)> {
        let len = self.norm();
        if len > 1e-12 {
            Some((self.x as f64 / len, self.y as f64 / len))
        } else {
            None
        }
    }

    /// Projection of this vector onto the outward radial direction at `position`.
    /// Zero when `position` sits on the origin.
    pub fn radial_component(&self, position: Vec2) -> f64 {
        match position.radial_unit() {
            Some((ux, uy)) => self.x as f64 * ux + self.y as f64 * uy,
            None => 0.0,
        }
    }

    /// Component-wise sign pair, used to spot velocity reversals between samples.
    pub fn signs(&self) -> (i8, i8) {
        (sign(self.x), sign(self.y))
    }
}

/// Sign of a component: -1, 0 or 1. Zero is its own sign, so a component that
/// goes from 0 to anything non-zero counts as a change.
pub fn sign(value: f32) -> i8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radial_component_of_outward_velocity() {
        let pos = Vec2::new(0.0, 2.0);
        let vel = Vec2::new(3.0, -4.0);
        assert_eq!(vel.radial_component(pos), -4.0);
        assert_eq!(vel.radial_component(Vec2::default()), 0.0);
    }

    #[test]
    fn zero_has_its_own_sign() {
        assert_eq!(sign(0.0), 0);
        assert_eq!(sign(-0.0), 0);
        assert_eq!(Vec2::new(-1.5, 2.0).signs(), (-1, 1));
    }
}
