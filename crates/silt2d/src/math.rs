//! Small 2D math types used across the solver.
//!
//! `glam` covers vectors; the rotor and transform types below exist because
//! the solver stores rotations as raw (sin, cos) pairs that several kernels
//! build and normalize by hand.

use glam::Vec2;

/// Cross product of a scalar (angular velocity) and a vector.
#[inline]
pub fn cross_sv(s: f32, v: Vec2) -> Vec2 {
    Vec2::new(-s * v.y, s * v.x)
}

/// `1 / sqrt(x)`.
#[inline]
pub fn inv_sqrt(x: f32) -> f32 {
    1.0 / x.sqrt()
}

/// A 2D rotation stored as (sin, cos).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rot {
    pub s: f32,
    pub c: f32,
}

impl Rot {
    pub const IDENTITY: Rot = Rot { s: 0.0, c: 1.0 };

    /// Rotation by `angle` radians.
    #[inline]
    pub fn new(angle: f32) -> Self {
        Self {
            s: angle.sin(),
            c: angle.cos(),
        }
    }

    /// Rotate a vector.
    #[inline]
    pub fn mul_vec2(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Inverse-rotate a vector.
    #[inline]
    pub fn mul_t_vec2(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// Compose two rotations (`self` after `other`).
    #[inline]
    pub fn mul(self, other: Rot) -> Rot {
        Rot {
            s: self.s * other.c + self.c * other.s,
            c: self.c * other.c - self.s * other.s,
        }
    }
}

/// A rigid transform: rotation followed by translation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub p: Vec2,
    pub q: Rot,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    #[inline]
    pub fn new(position: Vec2, angle: f32) -> Self {
        Self {
            p: position,
            q: Rot::new(angle),
        }
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn mul_vec2(self, v: Vec2) -> Vec2 {
        self.q.mul_vec2(v) + self.p
    }

    /// Apply the inverse transform to a point.
    #[inline]
    pub fn mul_t_vec2(self, v: Vec2) -> Vec2 {
        self.q.mul_t_vec2(v - self.p)
    }

    /// Compose two transforms (`self` applied after `other`).
    #[inline]
    pub fn mul(self, other: Transform) -> Transform {
        Transform {
            p: self.q.mul_vec2(other.p) + self.p,
            q: self.q.mul(other.q),
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub lower: Vec2,
    pub upper: Vec2,
}

impl Aabb {
    /// An empty box that any point or union will overwrite.
    pub const EMPTY: Aabb = Aabb {
        lower: Vec2::splat(f32::MAX),
        upper: Vec2::splat(f32::MIN),
    };

    #[inline]
    pub fn new(lower: Vec2, upper: Vec2) -> Self {
        Self { lower, upper }
    }

    /// Grow the box to include a point.
    #[inline]
    pub fn extend(&mut self, p: Vec2) {
        self.lower = self.lower.min(p);
        self.upper = self.upper.max(p);
    }

    /// Grow the box outward by `margin` on all sides.
    #[inline]
    pub fn expand(&mut self, margin: f32) {
        self.lower -= Vec2::splat(margin);
        self.upper += Vec2::splat(margin);
    }

    /// Closed-interval containment.
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        self.lower.x <= p.x && p.x <= self.upper.x && self.lower.y <= p.y && p.y <= self.upper.y
    }

    /// Open-interval containment, used by the particle queries.
    #[inline]
    pub fn contains_strict(&self, p: Vec2) -> bool {
        self.lower.x < p.x && p.x < self.upper.x && self.lower.y < p.y && p.y < self.upper.y
    }

    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.lower.x <= other.upper.x
            && other.lower.x <= self.upper.x
            && self.lower.y <= other.upper.y
            && other.lower.y <= self.upper.y
    }
}
