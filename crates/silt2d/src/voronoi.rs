//! Discrete Voronoi diagram over particle positions.
//!
//! Used once per group creation to find Delaunay-adjacent particle triples
//! for elastic triads. The plane is rasterized into cells of half a stride;
//! each cell is flooded with its nearest generator, and triples are read
//! off wherever three distinct generators meet at a cell corner.

use glam::Vec2;

#[derive(Clone, Copy, Debug)]
struct Generator {
    center: Vec2,
    tag: i32,
}

/// A Voronoi diagram builder over a set of tagged generator points.
pub(crate) struct VoronoiDiagram {
    generators: Vec<Generator>,
}

impl VoronoiDiagram {
    pub fn new(capacity: usize) -> Self {
        Self {
            generators: Vec::with_capacity(capacity),
        }
    }

    pub fn add_generator(&mut self, center: Vec2, tag: i32) {
        self.generators.push(Generator { center, tag });
    }

    /// Rasterize the diagram at cell size `radius` and invoke `visit` for
    /// every triple of distinct generators meeting at a cell corner.
    pub fn generate(&mut self, radius: f32, visit: &mut dyn FnMut(i32, i32, i32)) {
        if self.generators.len() < 3 {
            return;
        }
        let inverse_radius = 1.0 / radius;
        let mut lower = Vec2::splat(f32::MAX);
        let mut upper = Vec2::splat(f32::MIN);
        for g in &self.generators {
            lower = lower.min(g.center);
            upper = upper.max(g.center);
        }
        let count_x = 1 + (inverse_radius * (upper.x - lower.x)) as usize;
        let count_y = 1 + (inverse_radius * (upper.y - lower.y)) as usize;

        // Work in cell coordinates from here on.
        for g in &mut self.generators {
            g.center = inverse_radius * (g.center - lower);
        }

        const EMPTY: i32 = -1;
        let mut diagram = vec![EMPTY; count_x * count_y];
        let mut queue: std::collections::VecDeque<(usize, usize, u32)> =
            std::collections::VecDeque::with_capacity(4 * self.generators.len());
        for (k, g) in self.generators.iter().enumerate() {
            let x = (g.center.x as usize).min(count_x - 1);
            let y = (g.center.y as usize).min(count_y - 1);
            queue.push_back((x, y, k as u32));
        }

        // Dijkstra-like flood: a cell takes a generator when empty or when
        // the candidate is strictly closer than its current owner.
        while let Some((x, y, k)) = queue.pop_front() {
            let i = x + y * count_x;
            let candidate = &self.generators[k as usize];
            let cell = Vec2::new(x as f32, y as f32);
            let take = match diagram[i] {
                EMPTY => true,
                owner => {
                    let owner = &self.generators[owner as usize];
                    (candidate.center - cell).length_squared()
                        < (owner.center - cell).length_squared()
                }
            };
            if take {
                diagram[i] = k as i32;
                if x > 0 {
                    queue.push_back((x - 1, y, k));
                }
                if x + 1 < count_x {
                    queue.push_back((x + 1, y, k));
                }
                if y > 0 {
                    queue.push_back((x, y - 1, k));
                }
                if y + 1 < count_y {
                    queue.push_back((x, y + 1, k));
                }
            }
        }

        // Read triples off 2x2 corner blocks.
        for y in 0..count_y.saturating_sub(1) {
            for x in 0..count_x.saturating_sub(1) {
                let i = x + y * count_x;
                let a = diagram[i];
                let b = diagram[i + 1];
                let c = diagram[i + count_x];
                let d = diagram[i + 1 + count_x];
                if b != c {
                    if a != b && a != c {
                        visit(
                            self.generators[a as usize].tag,
                            self.generators[b as usize].tag,
                            self.generators[c as usize].tag,
                        );
                    }
                    if d != b && d != c {
                        visit(
                            self.generators[b as usize].tag,
                            self.generators[d as usize].tag,
                            self.generators[c as usize].tag,
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn triangle_of_generators_meets_at_a_corner() {
        let mut diagram = VoronoiDiagram::new(3);
        diagram.add_generator(Vec2::new(0.0, 0.0), 10);
        diagram.add_generator(Vec2::new(1.0, 0.0), 20);
        diagram.add_generator(Vec2::new(0.5, 1.0), 30);
        let mut triples = Vec::new();
        diagram.generate(0.1, &mut |a, b, c| triples.push((a, b, c)));
        assert!(!triples.is_empty(), "three close generators must meet");
        let tags: HashSet<i32> = triples
            .iter()
            .flat_map(|&(a, b, c)| [a, b, c])
            .collect();
        assert_eq!(tags, HashSet::from([10, 20, 30]));
        for (a, b, c) in triples {
            assert!(a != b && b != c && a != c);
        }
    }

    #[test]
    fn fewer_than_three_generators_yields_nothing() {
        let mut diagram = VoronoiDiagram::new(2);
        diagram.add_generator(Vec2::ZERO, 1);
        diagram.add_generator(Vec2::ONE, 2);
        let mut called = false;
        diagram.generate(0.5, &mut |_, _, _| called = true);
        assert!(!called);
    }

    #[test]
    fn grid_of_generators_triangulates_neighbors_only(){
        // A 3x3 lattice: emitted triples must connect mutually adjacent
        // lattice points, never opposite corners.
        let mut diagram = VoronoiDiagram::new(9);
        for y in 0..3 {
            for x in 0..3 {
                diagram.add_generator(Vec2::new(x as f32, y as f32), (y * 3 + x) as i32);
            }
        }
        let mut triples = Vec::new();
        diagram.generate(0.25, &mut |a, b, c| triples.push((a, b, c)));
        assert!(!triples.is_empty());
        for (a, b, c) in triples {
            for (p, q) in [(a, b), (b, c), (a, c)] {
                let (px, py) = (p % 3, p / 3);
                let (qx, qy) = (q % 3, q / 3);
                assert!(
                    (px - qx).abs() <= 1 && (py - qy).abs() <= 1,
                    "triple ({a},{b},{c}) connects non-adjacent lattice points"
                );
            }
        }
    }
}
