use super::*;
use crate::question::{Question, QuestionKey, QuestionKind, RadiusQuestion, ThermometerQuestion};
use crate::region::Unit;
use proptest::prelude::*;

fn amsterdam() -> Point<f64> {
    Point::new(4.89, 52.37)
}

fn zone() -> BaseArea {
    BaseArea::Zone {
        location: Location::named(amsterdam(), "Amsterdam"),
        radius: Distance::kilometers(50.0),
    }
}

fn radius(center: Point<f64>, km: f64, within: bool) -> QuestionKind {
    QuestionKind::Radius(RadiusQuestion {
        center,
        radius: km,
        unit: Unit::Kilometers,
        within,
    })
}

fn keyed(kinds: &[QuestionKind]) -> Vec<Question> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| Question {
            key: QuestionKey(i as u64),
            kind: *kind,
        })
        .collect()
}

const TOL: f64 = 1e-8;

#[test]
fn no_questions_is_the_base_region() {
    let cfg = EngineCfg::default();
    let base = zone();
    let region = reduce(&base, &[], &cfg).unwrap();
    assert_eq!(region, base.region(&cfg.geom).unwrap());
}

#[test]
fn inside_radius_is_contained_in_both_disks() {
    let cfg = EngineCfg::default();
    let q = radius(amsterdam(), 5.0, true);
    let region = reduce(&zone(), &keyed(&[q]), &cfg).unwrap();
    let small = CandidateRegion::from_polygon(disk(amsterdam(), Distance::kilometers(5.0), &cfg.geom));
    let base = zone().region(&cfg.geom).unwrap();
    assert!(!region.is_empty());
    assert!(region.area_outside(&small) < TOL);
    assert!(region.area_outside(&base) < TOL);
    assert!(region.area() < base.area());
}

#[test]
fn outside_radius_carves_a_hole() {
    let cfg = EngineCfg::default();
    let q = radius(amsterdam(), 5.0, false);
    let region = reduce(&zone(), &keyed(&[q]), &cfg).unwrap();
    assert!(!region.contains(amsterdam()));
    assert!(region.contains(Point::new(4.89, 52.55)));
    let hole = CandidateRegion::from_polygon(disk(amsterdam(), Distance::kilometers(5.0), &cfg.geom));
    assert!(region.intersect(&hole).area() < TOL);
}

#[test]
fn outside_radius_leaves_nothing_inside_the_circle() {
    use geo::{Destination, Distance as _, Haversine};
    let cfg = EngineCfg::default();
    let q = radius(amsterdam(), 5.0, false);
    let region = reduce(&zone(), &keyed(&[q]), &cfg).unwrap();
    let steps = cfg.geom.circle_steps;
    for k in 0..2 * steps {
        let bearing = 180.0 * k as f64 / steps as f64;
        for meters in [1_000.0, 4_000.0, 4_990.0] {
            let p = Haversine::destination(amsterdam(), bearing, meters);
            assert!(Haversine::distance(amsterdam(), p) < 5_000.0);
            assert!(!region.contains(p), "{meters} m at bearing {bearing}");
        }
    }
    assert!(region.contains(Haversine::destination(amsterdam(), 45.0, 5_200.0)));
}

#[test]
fn thermometer_keeps_the_warmer_side() {
    let cfg = EngineCfg::default();
    let a = Point::new(4.80, 52.37);
    let b = Point::new(4.98, 52.37);
    let warmer = QuestionKind::Thermometer(ThermometerQuestion { a, b, warmer: true });
    let region = reduce(&zone(), &keyed(&[warmer]), &cfg).unwrap();
    assert!(region.contains(Point::new(5.2, 52.37)));
    assert!(!region.contains(Point::new(4.6, 52.37)));

    let colder = QuestionKind::Thermometer(ThermometerQuestion { a, b, warmer: false });
    let region = reduce(&zone(), &keyed(&[colder]), &cfg).unwrap();
    assert!(region.contains(Point::new(4.6, 52.37)));
    assert!(!region.contains(Point::new(5.2, 52.37)));
}

#[test]
fn contradictory_questions_reduce_to_empty_without_error() {
    let cfg = EngineCfg::default();
    let far = Point::new(5.40, 52.37);
    let qs = keyed(&[
        radius(amsterdam(), 5.0, true),
        radius(far, 5.0, true),
        radius(amsterdam(), 1.0, false),
        QuestionKind::thermometer_at(amsterdam()),
    ]);
    let region = reduce(&zone(), &qs, &cfg).unwrap();
    assert!(region.is_empty());
}

#[test]
fn invalid_question_names_its_key() {
    let cfg = EngineCfg::default();
    let mut qs = keyed(&[radius(amsterdam(), 5.0, true)]);
    qs.push(Question {
        key: QuestionKey(42),
        kind: radius(amsterdam(), -1.0, true),
    });
    match reduce(&zone(), &qs, &cfg) {
        Err(EngineError::InvalidQuestion { key, .. }) => assert_eq!(key, QuestionKey(42)),
        other => panic!("expected InvalidQuestion, got {other:?}"),
    }
}

#[test]
fn malformed_base_areas_are_rejected() {
    let cfg = EngineCfg::default();
    let zero = BaseArea::Zone {
        location: Location::new(amsterdam()),
        radius: Distance::kilometers(0.0),
    };
    assert!(matches!(zero.region(&cfg.geom), Err(EngineError::MalformedBaseArea(_))));

    let off_globe = BaseArea::Zone {
        location: Location::new(Point::new(4.0, 120.0)),
        radius: Distance::kilometers(1.0),
    };
    assert!(matches!(off_globe.region(&cfg.geom), Err(EngineError::MalformedBaseArea(_))));

    let degenerate = BaseArea::polygon(Polygon::new(
        vec![(4.0, 52.0), (5.0, 52.0), (6.0, 52.0), (4.0, 52.0)].into(),
        vec![],
    ));
    assert!(matches!(degenerate.region(&cfg.geom), Err(EngineError::MalformedBaseArea(_))));

    assert!(matches!(
        BaseArea::Polygon(MultiPolygon::new(vec![])).region(&cfg.geom),
        Err(EngineError::MalformedBaseArea(_))
    ));
    assert!(matches!(
        reduce(&zero, &[], &cfg),
        Err(EngineError::MalformedBaseArea(_))
    ));
}

#[test]
fn polygon_base_is_used_as_is() {
    let cfg = EngineCfg::default();
    let square = BaseArea::polygon(Polygon::new(
        vec![(4.7, 52.3), (5.0, 52.3), (5.0, 52.5), (4.7, 52.5), (4.7, 52.3)].into(),
        vec![],
    ));
    let region = reduce(&square, &[], &cfg).unwrap();
    assert!((region.area() - 0.06).abs() < 1e-6);
    let cut = reduce(&square, &keyed(&[radius(amsterdam(), 3.0, false)]), &cfg).unwrap();
    assert!(cut.area() < region.area());
}

#[test]
fn scheduler_invalidates_older_generations() {
    let mut s = Scheduler::new();
    let g1 = s.advance();
    assert!(s.is_current(g1));
    let g2 = s.advance();
    assert!(g2 > g1);
    assert!(!s.is_current(g1));
    assert_eq!(s.current(), g2);
}

fn point_strategy() -> impl Strategy<Value = Point<f64>> {
    (4.6f64..5.2, 52.15f64..52.6).prop_map(|(x, y)| Point::new(x, y))
}

fn question_strategy() -> impl Strategy<Value = QuestionKind> {
    prop_oneof![
        (point_strategy(), 2.0f64..30.0, any::<bool>())
            .prop_map(|(c, km, within)| radius(c, km, within)),
        (point_strategy(), point_strategy(), any::<bool>())
            .prop_filter("distinct endpoints", |(a, b, _)| a != b)
            .prop_map(|(a, b, warmer)| QuestionKind::Thermometer(ThermometerQuestion {
                a,
                b,
                warmer
            })),
    ]
}

fn shuffled_pair() -> impl Strategy<Value = (Vec<QuestionKind>, Vec<QuestionKind>)> {
    prop::collection::vec(question_strategy(), 1..5)
        .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn reduce_ignores_question_order((original, shuffled) in shuffled_pair()) {
        let cfg = EngineCfg::default();
        let a = reduce(&zone(), &keyed(&original), &cfg).unwrap();
        // Keys follow the new positions, which must not matter either.
        let b = reduce(&zone(), &keyed(&shuffled), &cfg).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn adding_a_question_never_grows_the_region(
        qs in prop::collection::vec(question_strategy(), 0..4),
        extra in question_strategy(),
    ) {
        let cfg = EngineCfg::default();
        let before = reduce(&zone(), &keyed(&qs), &cfg).unwrap();
        let mut more = qs.clone();
        more.push(extra);
        let after = reduce(&zone(), &keyed(&more), &cfg).unwrap();
        prop_assert!(after.area_outside(&before) < 1e-7);
        if let QuestionKind::Radius(r) = extra {
            let d = CandidateRegion::from_polygon(disk(r.center, r.distance(), &cfg.geom));
            if r.within {
                prop_assert!(after.area_outside(&d) < 1e-7);
            } else {
                prop_assert!(after.intersect(&d).area() < 1e-7);
            }
        }
    }
}
