//! Station search and the request-coalescing Station Cache.
//!
//! The network transport is injected as a [`GeodataSource`]. The cache keeps
//! at most one request in flight per distinct [`StationQuery`]; every waiter
//! of that request receives the same result. Successes stay cached until
//! evicted, failures are reported to all waiters and forgotten so the next
//! call starts a fresh attempt.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use geo::Centroid;
use geo_types::{Coord, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::StationError;
use crate::question::validate_point;
use crate::region::BBox;

/// Overpass server-side timeout, seconds.
const QUERY_TIMEOUT_S: u32 = 180;
/// Fixed-point scale of [`SearchArea::Bbox`].
const FIXED_SCALE: f64 = 1e7;

/// `"<type>/<osm id>"`, e.g. `node/123`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
    /// Nodes, ways and relations at once.
    Nwr,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
            ElementKind::Nwr => "nwr",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputMode {
    Center,
    Geom,
    Body,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Center => "center",
            OutputMode::Geom => "geom",
            OutputMode::Body => "body",
        }
    }
}

/// Where to search. Coordinates are fixed point (1e-7 degrees) so the query
/// can be hashed and compared exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchArea {
    Bbox {
        south: i64,
        west: i64,
        north: i64,
        east: i64,
    },
    /// Overpass area id (relation id + 3600000000).
    AreaId(i64),
}

impl SearchArea {
    pub fn from_bbox(b: &BBox) -> Self {
        let fixed = |deg: f64| (deg * FIXED_SCALE).round() as i64;
        SearchArea::Bbox {
            south: fixed(b.min_lat),
            west: fixed(b.min_lng),
            north: fixed(b.max_lat),
            east: fixed(b.max_lng),
        }
    }

    fn filter_suffix(&self) -> String {
        match *self {
            SearchArea::Bbox {
                south,
                west,
                north,
                east,
            } => {
                let deg = |v: i64| v as f64 / FIXED_SCALE;
                format!(
                    "({:.7},{:.7},{:.7},{:.7})",
                    deg(south),
                    deg(west),
                    deg(north),
                    deg(east)
                )
            }
            SearchArea::AreaId(_) => "(area.region)".to_string(),
        }
    }
}

/// Cache key of a station search.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StationQuery {
    /// Tag filters such as `[railway=station]`. The first is the primary
    /// match, the rest are extra variants unioned into the same result.
    pub filters: Vec<String>,
    pub element: ElementKind,
    pub output: OutputMode,
    pub area: SearchArea,
}

impl StationQuery {
    /// `nwr` elements with centers, matching any of `filters` inside `area`.
    pub fn new<I, S>(filters: I, area: SearchArea) -> Result<Self, StationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filters: Vec<String> = filters
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if filters.is_empty() {
            return Err(StationError::EmptyConstraintSelection);
        }
        Ok(Self {
            filters,
            element: ElementKind::Nwr,
            output: OutputMode::Center,
            area,
        })
    }

    pub fn with_element(mut self, element: ElementKind) -> Self {
        self.element = element;
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    #[inline]
    pub fn primary(&self) -> &str {
        &self.filters[0]
    }

    #[inline]
    pub fn extras(&self) -> &[String] {
        &self.filters[1..]
    }

    /// Overpass QL text for this query.
    pub fn to_overpass(&self) -> String {
        let mut q = format!("[out:json][timeout:{QUERY_TIMEOUT_S}];\n");
        if let SearchArea::AreaId(id) = self.area {
            let _ = writeln!(q, "area(id:{id})->.region;");
        }
        q.push_str("(\n");
        let suffix = self.area.filter_suffix();
        for filter in &self.filters {
            let _ = writeln!(q, "{}{}{};", self.element.as_str(), filter, suffix);
        }
        q.push_str(");\n");
        let _ = write!(q, "out {};", self.output.as_str());
        q
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// One element of an Overpass JSON response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub center: Option<LatLon>,
    #[serde(default)]
    pub geometry: Vec<LatLon>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct OverpassResponse {
    elements: Vec<RawElement>,
}

/// Parse an Overpass `[out:json]` document.
pub fn parse_overpass(text: &str) -> Result<Vec<RawElement>, StationError> {
    serde_json::from_str::<OverpassResponse>(text)
        .map(|r| r.elements)
        .map_err(|e| StationError::MalformedResponse(e.to_string()))
}

/// A station as the core sees it: identity, location, tags.
#[derive(Clone, Debug, PartialEq)]
pub struct StationFeature {
    pub id: StationId,
    pub point: Point<f64>,
    pub tags: BTreeMap<String, String>,
}

impl StationFeature {
    /// Locate a raw element: node coordinate, then the server-provided
    /// center, then the centroid of its geometry. Elements with no valid
    /// location are dropped.
    pub fn from_raw(raw: &RawElement) -> Option<Self> {
        let point = match (raw.lat, raw.lon, raw.center) {
            (Some(lat), Some(lon), _) => Point::new(lon, lat),
            (_, _, Some(c)) => Point::new(c.lon, c.lat),
            _ => geometry_centroid(&raw.geometry)?,
        };
        validate_point(point).ok()?;
        Some(Self {
            id: StationId(format!("{}/{}", raw.kind, raw.id)),
            point,
            tags: raw.tags.clone(),
        })
    }

    /// `preferred` tag, then `name`.
    pub fn display_name(&self, preferred: &str) -> Option<&str> {
        self.tags
            .get(preferred)
            .or_else(|| self.tags.get("name"))
            .map(String::as_str)
    }
}

fn geometry_centroid(points: &[LatLon]) -> Option<Point<f64>> {
    let coords: Vec<Coord<f64>> = points
        .iter()
        .map(|p| Coord { x: p.lon, y: p.lat })
        .collect();
    let line = LineString::new(coords);
    match line.0.len() {
        0 => None,
        1 => Some(Point::from(line.0[0])),
        n if n >= 4 && line.is_closed() => Polygon::new(line, vec![]).centroid(),
        _ => line.centroid(),
    }
}

/// Immutable set of stations with an id index.
#[derive(Clone, Debug, Default)]
pub struct StationSet {
    features: Arc<[StationFeature]>,
    index: Arc<HashMap<StationId, usize>>,
}

impl StationSet {
    pub fn new(features: Arc<[StationFeature]>) -> Self {
        let index = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        Self {
            features,
            index: Arc::new(index),
        }
    }

    pub fn from_raw(raw: &[RawElement]) -> Self {
        Self::new(raw.iter().filter_map(StationFeature::from_raw).collect())
    }

    pub fn get(&self, id: &StationId) -> Option<&StationFeature> {
        self.index.get(id).map(|&i| &self.features[i])
    }

    pub fn contains(&self, id: &StationId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationFeature> {
        self.features.iter()
    }

    pub fn features(&self) -> &Arc<[StationFeature]> {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Transport to the external geodata service.
#[async_trait]
pub trait GeodataSource: Send + Sync {
    /// Run `query`. Transport failures and timeouts are reported as
    /// [`StationError::GeodataUnavailable`].
    async fn query(&self, query: &StationQuery) -> Result<Vec<RawElement>, StationError>;
}

type FetchResult = Result<Arc<[StationFeature]>, StationError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

enum Entry {
    Ready(Arc<[StationFeature]>),
    InFlight { id: u64, fut: SharedFetch },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    /// Calls that joined a request already in flight.
    pub inflight_hits: u64,
    pub misses: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    inflight_hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<StationQuery, Entry>>,
    counters: Counters,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<StationQuery, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct StationCache {
    source: Arc<dyn GeodataSource>,
    inner: Arc<Inner>,
}

impl fmt::Debug for StationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationCache")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl StationCache {
    pub fn new(source: Arc<dyn GeodataSource>) -> Self {
        Self {
            source,
            inner: Arc::new(Inner::default()),
        }
    }

    /// Cached result for `query`, joining or starting the request as needed.
    pub async fn fetch(&self, query: &StationQuery) -> FetchResult {
        let fut = {
            let mut entries = self.inner.lock();
            match entries.get(query) {
                Some(Entry::Ready(set)) => {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(filters = ?query.filters, "station_cache_hit");
                    return Ok(set.clone());
                }
                Some(Entry::InFlight { fut, .. }) => {
                    self.inner
                        .counters
                        .inflight_hits
                        .fetch_add(1, Ordering::Relaxed);
                    fut.clone()
                }
                None => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let fut = self.start(id, query.clone());
                    entries.insert(
                        query.clone(),
                        Entry::InFlight {
                            id,
                            fut: fut.clone(),
                        },
                    );
                    fut
                }
            }
        };
        fut.await
    }

    fn start(&self, id: u64, query: StationQuery) -> SharedFetch {
        let source = self.source.clone();
        let inner = self.inner.clone();
        async move {
            tracing::info!(filters = ?query.filters, "station_fetch_start");
            let result: FetchResult = source.query(&query).await.map(|raw| {
                raw.iter()
                    .filter_map(StationFeature::from_raw)
                    .collect::<Arc<[_]>>()
            });
            let mut entries = inner.lock();
            // Only settle the entry this request created; it may have been
            // evicted and replaced meanwhile.
            let ours = matches!(entries.get(&query), Some(Entry::InFlight { id: e, .. }) if *e == id);
            match &result {
                Ok(set) => {
                    tracing::info!(count = set.len(), "station_fetch_done");
                    if ours {
                        entries.insert(query, Entry::Ready(set.clone()));
                    }
                }
                Err(e) => {
                    inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "station_fetch_failed");
                    if ours {
                        entries.remove(&query);
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            inflight_hits: c.inflight_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    /// Number of entries, ready or in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cached(&self, query: &StationQuery) -> bool {
        matches!(self.inner.lock().get(query), Some(Entry::Ready(_)))
    }

    pub fn evict(&self, query: &StationQuery) -> bool {
        self.inner.lock().remove(query).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
