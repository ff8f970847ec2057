//! Shapes consumed by group creation and shape queries.
//!
//! The solver only needs a narrow surface from a shape: its child AABBs,
//! point containment for fill stamping, and child segments for perimeter
//! stamping. The concrete shapes here cover tests and simple hosts; a real
//! host world can implement [`Shape`] for its own geometry.

use crate::math::{Aabb, Transform};
use glam::Vec2;

/// Geometry the particle core can stamp particles into and test points
/// against.
pub trait Shape {
    /// Number of child primitives (chains have one per segment).
    fn child_count(&self) -> usize;

    /// World-space AABB of one child under `xf`.
    fn compute_aabb(&self, xf: &Transform, child: usize) -> Aabb;

    /// World-space point containment. Open shapes (edges, chains) contain
    /// nothing.
    fn test_point(&self, xf: &Transform, p: Vec2) -> bool;

    /// Local-space segment of one child, for shapes stamped along their
    /// perimeter. `None` for filled shapes.
    fn child_edge(&self, child: usize) -> Option<(Vec2, Vec2)> {
        let _ = child;
        None
    }
}

/// A solid circle.
#[derive(Clone, Copy, Debug)]
pub struct CircleShape {
    pub radius: f32,
    /// Center in shape-local coordinates.
    pub position: Vec2,
}

impl CircleShape {
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            position: Vec2::ZERO,
        }
    }
}

impl Shape for CircleShape {
    fn child_count(&self) -> usize {
        1
    }

    fn compute_aabb(&self, xf: &Transform, _child: usize) -> Aabb {
        let center = xf.mul_vec2(self.position);
        Aabb::new(center - Vec2::splat(self.radius), center + Vec2::splat(self.radius))
    }

    fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let center = xf.mul_vec2(self.position);
        (p - center).length_squared() <= self.radius * self.radius
    }
}

/// A solid oriented box.
#[derive(Clone, Copy, Debug)]
pub struct BoxShape {
    pub half_extents: Vec2,
    /// Center in shape-local coordinates.
    pub center: Vec2,
}

impl BoxShape {
    pub fn new(half_width: f32, half_height: f32) -> Self {
        Self {
            half_extents: Vec2::new(half_width, half_height),
            center: Vec2::ZERO,
        }
    }
}

impl Shape for BoxShape {
    fn child_count(&self) -> usize {
        1
    }

    fn compute_aabb(&self, xf: &Transform, _child: usize) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                let corner = self.center + self.half_extents * Vec2::new(sx, sy);
                aabb.extend(xf.mul_vec2(corner));
            }
        }
        aabb
    }

    fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let local = xf.mul_t_vec2(p) - self.center;
        local.x.abs() <= self.half_extents.x && local.y.abs() <= self.half_extents.y
    }
}

/// A single line segment.
#[derive(Clone, Copy, Debug)]
pub struct EdgeShape {
    pub vertex1: Vec2,
    pub vertex2: Vec2,
}

impl EdgeShape {
    pub fn new(vertex1: Vec2, vertex2: Vec2) -> Self {
        Self { vertex1, vertex2 }
    }
}

impl Shape for EdgeShape {
    fn child_count(&self) -> usize {
        1
    }

    fn compute_aabb(&self, xf: &Transform, _child: usize) -> Aabb {
        let v1 = xf.mul_vec2(self.vertex1);
        let v2 = xf.mul_vec2(self.vertex2);
        Aabb::new(v1.min(v2), v1.max(v2))
    }

    fn test_point(&self, _xf: &Transform, _p: Vec2) -> bool {
        false
    }

    fn child_edge(&self, _child: usize) -> Option<(Vec2, Vec2)> {
        Some((self.vertex1, self.vertex2))
    }
}

/// An open polyline; each segment is one child.
#[derive(Clone, Debug)]
pub struct ChainShape {
    pub vertices: Vec<Vec2>,
}

impl ChainShape {
    pub fn new(vertices: Vec<Vec2>) -> Self {
        debug_assert!(vertices.len() >= 2);
        Self { vertices }
    }
}

impl Shape for ChainShape {
    fn child_count(&self) -> usize {
        self.vertices.len() - 1
    }

    fn compute_aabb(&self, xf: &Transform, child: usize) -> Aabb {
        let v1 = xf.mul_vec2(self.vertices[child]);
        let v2 = xf.mul_vec2(self.vertices[child + 1]);
        Aabb::new(v1.min(v2), v1.max(v2))
    }

    fn test_point(&self, _xf: &Transform, _p: Vec2) -> bool {
        false
    }

    fn child_edge(&self, child: usize) -> Option<(Vec2, Vec2)> {
        Some((self.vertices[child], self.vertices[child + 1]))
    }
}
