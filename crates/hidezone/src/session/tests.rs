use super::*;
use crate::engine::Location;
use crate::error::{EngineError, StoreError};
use crate::events::{EventLog, NullSink};
use crate::persist::{DirPersistence, MemoryPersistence};
use crate::question::RadiusQuestion;
use crate::region::{disk, Distance};
use crate::stations::{GeodataSource, RawElement, StationCache, StationFeature};
use async_trait::async_trait;
use geo::{Destination, Haversine};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TOL: f64 = 1e-9;

fn amsterdam() -> Point<f64> {
    Point::new(4.89, 52.37)
}

fn zone(center: Point<f64>, km: f64) -> BaseArea {
    BaseArea::Zone {
        location: Location::new(center),
        radius: Distance::kilometers(km),
    }
}

fn five_km_inside() -> QuestionKind {
    QuestionKind::Radius(RadiusQuestion {
        center: amsterdam(),
        radius: 5.0,
        unit: Unit::Kilometers,
        within: true,
    })
}

fn station(id: &str, point: Point<f64>) -> StationFeature {
    StationFeature {
        id: StationId::new(id),
        point,
        tags: BTreeMap::new(),
    }
}

fn station_set(stations: Vec<StationFeature>) -> StationSet {
    StationSet::new(Arc::from(stations))
}

fn session() -> (Session, EventLog) {
    let log = EventLog::new();
    let s = Session::new(MemoryPersistence::new(), log.clone());
    (s, log)
}

/// 50 km zone around Amsterdam plus "within 5 km".
fn zone_with_question() -> (Session, EventLog) {
    let (mut s, log) = session();
    s.set_base_area(zone(amsterdam(), 50.0)).unwrap();
    s.add_question(five_km_inside()).unwrap();
    log.take();
    (s, log)
}

fn region_changes(events: &[CoreEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CoreEvent::RegionChanged(_)))
        .count()
}

#[test]
fn fresh_session_starts_from_the_default_zone() {
    let (s, log) = session();
    assert!(matches!(s.base_area(), BaseArea::Zone { .. }));
    assert!(s.questions().is_empty());
    assert!(!s.region().is_empty());
    assert!(log.take().is_empty());
}

#[test]
fn radius_question_confines_region_to_its_disk() {
    let (s, _) = zone_with_question();
    let cfg = EngineCfg::default();
    let five =
        CandidateRegion::from_polygon(disk(amsterdam(), Distance::kilometers(5.0), &cfg.geom));
    assert!(!s.region().is_empty());
    assert!(s.region().area_outside(&five) < TOL);
    assert!(s.region().area() < zone(amsterdam(), 50.0).region(&cfg.geom).unwrap().area());
}

#[test]
fn each_change_commits_exactly_once() {
    let (mut s, log) = session();
    let key = s.add_question(five_km_inside()).unwrap();
    assert_eq!(region_changes(&log.take()), 1);
    s.update_question(key, |k| {
        if let QuestionKind::Radius(r) = k {
            r.within = false;
        }
    })
    .unwrap();
    assert_eq!(region_changes(&log.take()), 1);
    s.remove_question(key).unwrap();
    assert_eq!(region_changes(&log.take()), 1);
}

#[test]
fn far_station_changes_nothing() {
    let (mut s, log) = zone_with_question();
    let far = station("node/10", Haversine::destination(amsterdam(), 0.0, 10_000.0));
    assert!(s.apply_stations(s.generation(), Ok(station_set(vec![far.clone()]))).unwrap());
    let before = s.region().area();
    log.take();

    let out = s.eliminate_station(&far.id).unwrap();
    assert!(out.committed);
    assert!(!out.contradiction);
    assert!((s.region().area() - before).abs() < TOL);
    assert!(s.exclusions().contains(&far.id));

    let events = log.take();
    assert_eq!(events[0], CoreEvent::FocusStation(far.id.clone()));
    assert!(matches!(
        events[1],
        CoreEvent::FitViewport { animated: false, .. }
    ));
    assert_eq!(region_changes(&events), 1);
}

#[test]
fn near_station_cuts_its_mask() {
    let (mut s, log) = zone_with_question();
    let near = station("node/2", Haversine::destination(amsterdam(), 90.0, 2_000.0));
    s.apply_stations(s.generation(), Ok(station_set(vec![near.clone()])))
        .unwrap();
    let before = s.region().area();
    let mask = exclusion_mask(&near, s.settings().hiding_distance(), &EngineCfg::default().geom);
    let mask_area = CandidateRegion::from_polygon(mask).area();

    let out = s.eliminate_station(&near.id).unwrap();
    assert!(!out.contradiction);
    assert!(!s.region().contains(near.point));
    let removed = before - s.region().area();
    assert!((removed - mask_area).abs() < 1e-3 * mask_area);
    assert_eq!(out.region, *s.region());
    assert!(!log.take().iter().any(|e| matches!(e, CoreEvent::Contradiction(_))));

    assert!(s.restore_station(&near.id));
    assert!(!s.restore_station(&near.id));
    assert!((s.region().area() - before).abs() < TOL);
}

#[test]
fn eliminating_twice_only_refocuses() {
    let (mut s, log) = zone_with_question();
    let near = station("node/2", Haversine::destination(amsterdam(), 90.0, 2_000.0));
    s.apply_stations(s.generation(), Ok(station_set(vec![near.clone()])))
        .unwrap();
    s.eliminate_station(&near.id).unwrap();
    let generation = s.generation();
    log.take();

    let again = s.eliminate_station(&near.id).unwrap();
    assert!(!again.committed);
    assert_eq!(s.generation(), generation);
    assert_eq!(region_changes(&log.take()), 0);
}

#[test]
fn contradiction_follows_the_policy() {
    let centre = amsterdam();
    let only = station("node/1", centre);

    let (mut s, log) = session();
    s.set_base_area(zone(centre, 0.2)).unwrap();
    s.apply_stations(s.generation(), Ok(station_set(vec![only.clone()])))
        .unwrap();
    log.take();
    let out = s.eliminate_station(&only.id).unwrap();
    assert!(out.contradiction && out.committed);
    assert!(s.region().is_empty());
    assert!(log.take().contains(&CoreEvent::Contradiction(only.id.clone())));

    let (mut s, log) = session();
    s.set_policy(ContradictionPolicy::Reject);
    s.set_base_area(zone(centre, 0.2)).unwrap();
    s.apply_stations(s.generation(), Ok(station_set(vec![only.clone()])))
        .unwrap();
    let before = s.region().clone();
    log.take();
    let out = s.eliminate_station(&only.id).unwrap();
    assert!(out.contradiction && !out.committed);
    assert_eq!(*s.region(), before);
    assert!(s.exclusions().is_empty());
    assert_eq!(region_changes(&log.take()), 0);
}

#[test]
fn unknown_station_is_rejected() {
    let (mut s, log) = zone_with_question();
    let err = s.eliminate_station(&StationId::new("node/404")).unwrap_err();
    assert!(matches!(err, CoreError::Refine(RefineError::UnknownStation(_))));
    assert!(matches!(log.take().as_slice(), [CoreEvent::ValidationError(_)]));
}

#[test]
fn stale_station_results_are_discarded() {
    let (mut s, _) = zone_with_question();
    let issued = s.station_request().unwrap().unwrap();
    s.add_question(QuestionKind::thermometer_at(amsterdam())).unwrap();
    assert_ne!(issued.generation, s.generation());

    let late = station_set(vec![station("node/1", amsterdam())]);
    assert!(!s.apply_stations(issued.generation, Ok(late)).unwrap());
    assert!(s.stations().is_empty());
}

#[test]
fn failed_station_search_keeps_the_previous_set() {
    let (mut s, log) = zone_with_question();
    let set = station_set(vec![station("node/1", amsterdam())]);
    s.apply_stations(s.generation(), Ok(set)).unwrap();
    let err = s
        .apply_stations(
            s.generation(),
            Err(StationError::GeodataUnavailable("timeout".to_string())),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Station(StationError::GeodataUnavailable(_))));
    assert_eq!(s.stations().len(), 1);
    assert!(matches!(log.take().last(), Some(CoreEvent::ValidationError(_))));
}

#[test]
fn each_question_change_advances_store_and_region_together() {
    let (mut s, log) = session();
    s.set_base_area(zone(amsterdam(), 50.0)).unwrap();
    log.take();
    let revision = s.store().revision();
    let before = s.region().clone();

    let key = s.add_question(five_km_inside()).unwrap();
    assert_eq!(s.store().revision(), revision + 1);
    assert!(s.region().area() < before.area());
    let changed = log
        .take()
        .into_iter()
        .filter(|e| matches!(e, CoreEvent::RegionChanged(_)))
        .count();
    assert_eq!(changed, 1);

    s.remove_question(key).unwrap();
    assert_eq!(s.store().revision(), revision + 2);
    assert!((s.region().area() - before.area()).abs() < TOL);
}

#[test]
fn rejected_question_changes_nothing() {
    let (mut s, log) = zone_with_question();
    let questions = s.questions().to_vec();
    let revision = s.store().revision();
    let generation = s.generation();

    let bad = QuestionKind::Radius(RadiusQuestion {
        center: amsterdam(),
        radius: -1.0,
        unit: Unit::Kilometers,
        within: true,
    });
    let err = s.add_question(bad).unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::InvalidQuestion(_))));
    assert_eq!(s.questions(), &questions[..]);
    assert_eq!(s.store().revision(), revision);
    assert_eq!(s.generation(), generation);
    assert!(matches!(log.take().as_slice(), [CoreEvent::ValidationError(_)]));
}

#[test]
fn malformed_base_area_keeps_the_previous_region() {
    let (mut s, log) = zone_with_question();
    let before = s.region().clone();
    let flat = BaseArea::polygon(Polygon::new(
        vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)].into(),
        vec![],
    ));
    let err = s.set_base_area(flat).unwrap_err();
    assert!(matches!(err, CoreError::Engine(EngineError::MalformedBaseArea(_))));
    assert_eq!(*s.region(), before);
    assert!(matches!(s.base_area(), BaseArea::Zone { .. }));
    assert_eq!(region_changes(&log.take()), 0);
}

#[test]
fn empty_filter_list_never_becomes_a_request() {
    let (mut s, log) = zone_with_question();
    s.set_station_filters(vec![" ".to_string()]).unwrap();
    log.take();
    let err = s.station_request().unwrap_err();
    assert!(matches!(err, CoreError::Station(StationError::EmptyConstraintSelection)));
    assert!(matches!(log.take().as_slice(), [CoreEvent::ValidationError(_)]));

    s.update_settings(|st| st.display_stations = false).unwrap();
    assert_eq!(s.station_request().unwrap(), None);
}

#[test]
fn settings_only_recompute_when_geometry_depends_on_them() {
    let (mut s, log) = zone_with_question();
    let generation = s.generation();
    s.update_settings(|st| st.animate_map_movements = true).unwrap();
    assert_eq!(s.generation(), generation);
    s.set_unit(Unit::Miles).unwrap();
    assert_ne!(s.generation(), generation);
    assert_eq!(region_changes(&log.take()), 1);
    assert!(s.set_hiding_radius(0.0).is_err());
    assert_eq!(s.settings().unit, Unit::Miles);
}

#[test]
fn snapshot_moves_a_zone_between_sessions() {
    let (mut a, _) = zone_with_question();
    a.set_hiding_radius(0.8).unwrap();
    let near = station("node/2", Haversine::destination(amsterdam(), 90.0, 2_000.0));
    a.apply_stations(a.generation(), Ok(station_set(vec![near.clone()])))
        .unwrap();
    a.eliminate_station(&near.id).unwrap();

    let (mut b, log) = session();
    b.load_snapshot(&a.share_url("https://hide.example/")).unwrap();
    assert_eq!(b.questions(), a.questions());
    assert_eq!(b.exclusions(), a.exclusions());
    assert_eq!(b.settings().hiding_radius, 0.8);
    assert_eq!(region_changes(&log.take()), 1);

    // The exclusion only bites once b knows where node/2 is.
    assert!((b.region().area() - a.constrained_region().area()).abs() < TOL);
    b.apply_stations(b.generation(), Ok(station_set(vec![near])))
        .unwrap();
    assert!((b.region().area() - a.region().area()).abs() < TOL);
}

#[test]
fn failed_snapshot_load_leaves_state_intact() {
    let (mut s, log) = zone_with_question();
    let before = s.snapshot();
    let region = s.region().clone();
    let bad = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]],
        "questions":[{"id":"radius","data":{"lat":0.5,"lng":0.5,"radius":-3}}]}"#;
    assert!(matches!(
        s.load_snapshot(bad),
        Err(CoreError::Snapshot(_))
    ));
    assert!(s.load_snapshot("definitely not a share string").is_err());
    assert_eq!(s.snapshot(), before);
    assert_eq!(*s.region(), region);
    assert_eq!(region_changes(&log.take()), 0);
}

#[test]
fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let open = || DirPersistence::open(dir.path()).unwrap();

    let mut s = Session::new(open(), NullSink);
    s.set_base_area(zone(amsterdam(), 50.0)).unwrap();
    s.add_question(five_km_inside()).unwrap();
    s.set_hiding_radius(0.75).unwrap();
    let area = s.region().area();
    let questions = s.questions().to_vec();
    drop(s);

    let s = Session::new(open(), NullSink);
    assert_eq!(s.questions(), &questions[..]);
    assert_eq!(s.settings().hiding_radius, 0.75);
    assert!((s.region().area() - area).abs() < TOL);
}

#[test]
fn without_auto_save_only_settings_persist_until_save() {
    let dir = tempfile::tempdir().unwrap();
    let open = || DirPersistence::open(dir.path()).unwrap();

    let mut s = Session::new(open(), NullSink);
    s.update_settings(|st| st.auto_save = false).unwrap();
    s.add_question(five_km_inside()).unwrap();

    let reopened = Session::new(open(), NullSink);
    assert!(!reopened.settings().auto_save);
    assert!(reopened.questions().is_empty());

    s.save().unwrap();
    let reopened = Session::new(open(), NullSink);
    assert_eq!(reopened.questions(), s.questions());
}

#[test]
fn unreadable_persisted_values_fall_back_to_defaults() {
    let mut p = MemoryPersistence::new();
    p.save(KEY_SETTINGS, "{\"hidingRadius\":-4}").unwrap();
    p.save(KEY_QUESTIONS, "not json").unwrap();
    p.save(KEY_BASE_AREA, "[]").unwrap();
    p.save(KEY_DISABLED_STATIONS, "[\"node/1\"]").unwrap();
    let s = Session::new(p, NullSink);
    assert_eq!(s.settings(), &Settings::default());
    assert!(s.questions().is_empty());
    assert!(matches!(s.base_area(), BaseArea::Zone { .. }));
    assert!(s.exclusions().contains(&StationId::new("node/1")));
}

// ---- async host ----

struct CountingSource {
    calls: AtomicUsize,
}

impl CountingSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn node(id: i64, lat: f64, lon: f64) -> RawElement {
    RawElement {
        kind: "node".to_string(),
        id,
        lat: Some(lat),
        lon: Some(lon),
        center: None,
        geometry: vec![],
        tags: BTreeMap::new(),
    }
}

#[async_trait]
impl GeodataSource for CountingSource {
    async fn query(
        &self,
        _query: &StationQuery,
    ) -> std::result::Result<Vec<RawElement>, StationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(vec![node(1, 52.37, 4.92), node(2, 52.40, 4.80)])
    }
}

async fn wait_for_stations(handle: &SessionHandle, n: usize) -> StationSet {
    for _ in 0..200 {
        let set = handle.stations().await.unwrap();
        if set.len() == n {
            return set;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stations never arrived");
}

#[tokio::test]
async fn task_fetches_stations_and_serializes_commands() {
    let source = CountingSource::new();
    let cache = Arc::new(StationCache::new(source.clone()));
    let (s, _) = session();
    let (handle, join) = spawn_session(s, cache.clone());

    let set = wait_for_stations(&handle, 2).await;
    let id = StationId::new("node/1");
    assert!(set.contains(&id));

    let before = handle.region().await.unwrap().area();
    let key = handle.add_question(five_km_inside()).await.unwrap();
    let out = handle.eliminate_station(id.clone()).await.unwrap();
    assert!(out.committed);
    assert!(handle.region().await.unwrap().area() < before);
    assert!(handle.restore_station(id.clone()).await.unwrap());
    handle.remove_question(key).await.unwrap();

    // Every later search for the same area is served by the cache.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.calls(), 1);
    assert!(cache.stats().hits >= 1);

    handle.shutdown();
    let s = join.await.unwrap();
    assert!(s.questions().is_empty());
    assert!(matches!(handle.region().await, Err(CoreError::Closed)));
}

#[tokio::test]
async fn task_never_queries_with_an_empty_filter_list() {
    let source = CountingSource::new();
    let cache = Arc::new(StationCache::new(source.clone()));
    let (mut s, _) = session();
    s.set_station_filters(vec![]).unwrap();
    let (handle, join) = spawn_session(s, cache);

    handle.add_question(five_km_inside()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.calls(), 0);
    assert!(handle.stations().await.unwrap().is_empty());

    drop(handle);
    let s = join.await.unwrap();
    assert_eq!(s.questions().len(), 1);
}
