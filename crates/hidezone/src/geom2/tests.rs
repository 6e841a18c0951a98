use super::*;
use geo_types::Point;
use nalgebra::{vector, Vector2};

fn cfg() -> GeomCfg {
    GeomCfg::default()
}

#[test]
fn opposite_half_planes_can_be_disjoint() {
    // x <= 0 and x >= 1
    let mut p = Poly2::default();
    p.insert(Hs2::new(vector![1.0, 0.0], 0.0));
    p.insert(Hs2::new(vector![-1.0, 0.0], -1.0));
    assert_eq!(p.clip(&cfg()), HalfspaceIntersection::Empty);
}

#[test]
fn box_clips_to_its_four_corners() {
    let q = Poly2::rect(vector![1.0, 2.0], vector![5.0, 3.0]);
    let verts = q.clip(&cfg()).vertices().expect("bounded box");
    assert_eq!(verts.len(), 4);
    for v in verts {
        assert!(v.x >= 1.0 - 1e-9 && v.x <= 5.0 + 1e-9);
        assert!(v.y >= 2.0 - 1e-9 && v.y <= 3.0 + 1e-9);
    }
}

#[test]
fn parallel_cuts_keep_the_tighter_one() {
    let p = Poly2::rect(vector![0.0, 0.0], vector![4.0, 4.0])
        .with_cut(Hs2::new(vector![2.0, 0.0], 2.0))
        .with_cut(Hs2::new(vector![1.0, 0.0], 3.0));
    assert_eq!(p.clip(&cfg()).vertices().map(|v| v.len()), Some(4));
    assert!(p.contains(vector![0.9, 1.0], 0.0));
    assert!(!p.contains(vector![1.1, 1.0], 0.0));
}

#[test]
fn bisector_cut_halves_the_box() {
    let near = vector![-1.0, 0.0];
    let far = vector![1.0, 0.0];
    // x <= 0
    let cut = Hs2::new(far - near, 0.0);
    let clipped = Poly2::rect(vector![-2.0, -1.0], vector![2.0, 1.0]).with_cut(cut);
    let verts = clipped.clip(&cfg()).vertices().unwrap();
    assert!(verts.iter().all(|v| v.x <= 1e-9));
    assert!(verts.iter().any(|v| (v.x + 2.0).abs() < 1e-9));
    assert!(clipped.contains(near, 0.0));
    assert!(!clipped.contains(far, 0.0));
}

#[test]
fn cut_that_misses_the_box_leaves_nothing_bounded() {
    let cut = Hs2::new(vector![1.0, 1.0], -1.0);
    let clipped = Poly2::rect(vector![0.0, 0.0], vector![1.0, 1.0]).with_cut(cut);
    assert!(clipped.clip(&cfg()).vertices().is_none());
}

#[test]
fn redundant_cut_leaves_the_box() {
    let cut = Hs2::new(vector![1.0, 1.0], 10.0);
    let clipped = Poly2::rect(vector![0.0, 0.0], vector![1.0, 1.0]).with_cut(cut);
    assert_eq!(clipped.clip(&cfg()).vertices().map(|v| v.len()), Some(4));
}

#[test]
fn degenerate_half_planes_are_ignored() {
    assert!(Hs2::new(Vector2::zeros(), 1.0).normalized().is_none());
    let mut p = Poly2::default();
    p.insert(Hs2::new(Vector2::zeros(), 1.0));
    p.insert(Hs2::new(vector![f64::NAN, 0.0], 1.0));
    assert_eq!(p.clip(&cfg()), HalfspaceIntersection::Unbounded);
}

#[test]
fn frame_round_trips_and_centres_on_its_origin() {
    let amsterdam = Point::new(4.89, 52.37);
    let frame = LocalFrame::new(amsterdam);
    assert!(frame.project(amsterdam).unwrap().norm() < 1e-15);
    let p = Point::new(5.0, 52.5);
    let back = frame.unproject(frame.project(p).unwrap());
    assert!((back.x() - p.x()).abs() < 1e-12 && (back.y() - p.y()).abs() < 1e-12);
    let north = frame.project(Point::new(4.89, 53.37)).unwrap();
    assert!(north.x.abs() < 1e-12 && north.y > 0.0);
    // Antipode side has no image.
    assert!(frame.project(Point::new(-175.11, -52.37)).is_none());
}

#[test]
fn great_circles_project_to_lines() {
    let frame = LocalFrame::new(Point::new(4.89, 52.37));
    let a = Point::new(3.0, 51.0);
    let b = Point::new(7.0, 53.5);
    let cut = frame.nearer_to(a, b).unwrap().normalized().unwrap();
    // The equator and the Greenwich meridian are great circles too.
    for line in [
        [Point::new(-10.0, 0.0), Point::new(0.0, 0.0), Point::new(20.0, 0.0)],
        [Point::new(0.0, 30.0), Point::new(0.0, 50.0), Point::new(0.0, 70.0)],
    ] {
        let [p, q, r] = line.map(|x| frame.project(x).unwrap());
        let (u, v) = (q - p, r - p);
        assert!((u.x * v.y - u.y * v.x).abs() < 1e-9 * u.norm() * v.norm());
    }
    assert!(cut.satisfies_eps(frame.project(a).unwrap(), 0.0));
    assert!(!cut.satisfies_eps(frame.project(b).unwrap(), 0.0));
    assert!(frame.nearer_to(a, a).is_none());
}
