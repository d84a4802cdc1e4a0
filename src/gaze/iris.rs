//! Iris observations as minimal enclosing circles

use glam::{DVec2, Vec2};

/// Containment tolerance relative to the circle size
const EPSILON: f64 = 1e-7;

/// Iris circle for one eye, in frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrisObservation {
    pub center: Vec2,
    pub radius: f32,
}

/// Minimal enclosing circle of the iris contour points.
///
/// Returns `None` for empty input. Collinear input yields the circle over the
/// farthest pair, so the center always lies inside the convex hull.
pub fn iris_center(points: &[Vec2]) -> Option<IrisObservation> {
    let points: Vec<DVec2> = points.iter().map(|p| p.as_dvec2()).collect();
    let circle = min_enclosing_circle(&points)?;
    Some(IrisObservation {
        center: circle.center.as_vec2(),
        radius: circle.radius as f32,
    })
}

#[derive(Debug, Clone, Copy)]
struct Circle {
    center: DVec2,
    radius: f64,
}

impl Circle {
    fn point(p: DVec2) -> Self {
        Self {
            center: p,
            radius: 0.0,
        }
    }

    fn from_pair(a: DVec2, b: DVec2) -> Self {
        Self {
            center: (a + b) * 0.5,
            radius: a.distance(b) * 0.5,
        }
    }

    fn from_triple(a: DVec2, b: DVec2, c: DVec2) -> Self {
        let ab = b - a;
        let ac = c - a;
        let d = 2.0 * ab.perp_dot(ac);
        if d.abs() <= EPSILON * (ab.length_squared() + ac.length_squared()).max(1.0) {
            // Collinear: the widest pair spans the other point
            return [Self::from_pair(a, b), Self::from_pair(a, c), Self::from_pair(b, c)]
                .into_iter()
                .fold(Self::point(a), |best, c| if c.radius > best.radius { c } else { best });
        }
        let ab2 = ab.length_squared();
        let ac2 = ac.length_squared();
        let offset = DVec2::new(ac.y * ab2 - ab.y * ac2, ab.x * ac2 - ac.x * ab2) / d;
        let center = a + offset;
        Self {
            center,
            radius: center.distance(a),
        }
    }

    fn contains(&self, p: DVec2) -> bool {
        self.center.distance(p) <= self.radius + EPSILON * (1.0 + self.radius)
    }
}

/// Incremental construction; quadratic-ish in the worst case, which is fine
/// for the handful of iris contour points per eye.
fn min_enclosing_circle(points: &[DVec2]) -> Option<Circle> {
    let (&first, _) = points.split_first()?;
    let mut circle = Circle::point(first);
    for i in 1..points.len() {
        if circle.contains(points[i]) {
            continue;
        }
        circle = Circle::point(points[i]);
        for j in 0..i {
            if circle.contains(points[j]) {
                continue;
            }
            circle = Circle::from_pair(points[i], points[j]);
            for k in 0..j {
                if !circle.contains(points[k]) {
                    circle = Circle::from_triple(points[i], points[j], points[k]);
                }
            }
        }
    }
    Some(circle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Convex hull by monotone chain, counter-clockwise
    fn convex_hull(points: &[Vec2]) -> Vec<Vec2> {
        let mut pts = points.to_vec();
        pts.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap().then(a.y.partial_cmp(&b.y).unwrap()));
        pts.dedup();
        if pts.len() < 3 {
            return pts;
        }
        let mut lower: Vec<Vec2> = Vec::new();
        for &p in &pts {
            while lower.len() >= 2 && (lower[lower.len() - 1] - lower[lower.len() - 2]).perp_dot(p - lower[lower.len() - 1]) <= 0.0 {
                lower.pop();
            }
            lower.push(p);
        }
        let mut upper: Vec<Vec2> = Vec::new();
        for &p in pts.iter().rev() {
            while upper.len() >= 2 && (upper[upper.len() - 1] - upper[upper.len() - 2]).perp_dot(p - upper[upper.len() - 1]) <= 0.0 {
                upper.pop();
            }
            upper.push(p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);
        lower
    }

    fn inside_hull(hull: &[Vec2], p: Vec2) -> bool {
        let tolerance = 1e-3;
        hull.iter().enumerate().all(|(i, &a)| {
            let b = hull[(i + 1) % hull.len()];
            (b - a).perp_dot(p - a) >= -tolerance * (b - a).length()
        })
    }

    fn assert_encloses(points: &[Vec2], iris: &IrisObservation) {
        for p in points {
            assert!(
                p.distance(iris.center) <= iris.radius + 1e-3,
                "{:?} outside circle {:?}",
                p,
                iris
            );
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(iris_center(&[]).is_none());
    }

    #[test]
    fn test_single_point() {
        let iris = iris_center(&[Vec2::new(3.0, 4.0)]).unwrap();
        assert_eq!(iris.center, Vec2::new(3.0, 4.0));
        assert_eq!(iris.radius, 0.0);
    }

    #[test]
    fn test_iris_contour_diamond() {
        // Typical iris contour: four points around the pupil
        let points = [
            Vec2::new(110.0, 100.0),
            Vec2::new(100.0, 95.0),
            Vec2::new(90.0, 100.0),
            Vec2::new(100.0, 105.0),
        ];
        let iris = iris_center(&points).unwrap();
        assert!(iris.center.distance(Vec2::new(100.0, 100.0)) < 1e-3);
        assert!((iris.radius - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_obtuse_triangle_uses_longest_side() {
        let points = [Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0), Vec2::new(5.0, 1.0)];
        let iris = iris_center(&points).unwrap();
        assert!(iris.center.distance(Vec2::new(5.0, 0.0)) < 1e-3);
        assert!((iris.radius - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_collinear_points() {
        let points = [Vec2::new(0.0, 0.0), Vec2::new(2.0, 2.0), Vec2::new(4.0, 4.0), Vec2::new(1.0, 1.0)];
        let iris = iris_center(&points).unwrap();
        assert!(iris.center.distance(Vec2::new(2.0, 2.0)) < 1e-3);
        assert_encloses(&points, &iris);
    }

    #[test]
    fn test_center_within_convex_hull() {
        let sets: Vec<Vec<Vec2>> = vec![
            vec![Vec2::new(0.0, 0.0), Vec2::new(7.0, 1.0), Vec2::new(3.0, 6.0)],
            vec![Vec2::new(320.5, 240.2), Vec2::new(318.0, 236.9), Vec2::new(315.1, 240.0), Vec2::new(318.2, 243.3)],
            vec![Vec2::new(1.0, 1.0), Vec2::new(9.0, 2.0), Vec2::new(8.0, 8.0), Vec2::new(2.0, 9.0), Vec2::new(5.0, 5.0)],
            vec![Vec2::new(-4.0, 0.0), Vec2::new(4.0, 0.0), Vec2::new(0.0, 0.5), Vec2::new(0.0, -0.5)],
        ];
        for points in sets {
            let iris = iris_center(&points).unwrap();
            assert!(iris.radius >= 0.0);
            assert_encloses(&points, &iris);
            let hull = convex_hull(&points);
            assert!(inside_hull(&hull, iris.center), "center {:?} outside hull {:?}", iris.center, hull);
        }
    }
}
