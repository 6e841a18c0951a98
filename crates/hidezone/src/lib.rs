//! Hiding-zone core: constraint store, geometry engine, station cache,
//! selection refiner and snapshot codec.
//!
//! Coordinates are WGS84 `(lng, lat)` points throughout (`geo_types`
//! convention); only the snapshot wire format writes locations as
//! `[lat, lng]`.
//!
//! API Policy
//! - The crate is consumed by the `hidezone` CLI and by embedding hosts.
//!   [`session::Session`] is the entry point; the lower modules are public
//!   so hosts and benches can drive them directly.

pub mod engine;
pub mod error;
pub mod events;
pub mod geom2;
pub mod persist;
pub mod question;
pub mod refine;
pub mod region;
pub mod session;
pub mod snapshot;
pub mod stations;
pub mod store;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{CoreError, Result};
pub use geom2::GeomCfg;

/// Common exports for hosts.
pub mod prelude {
    pub use crate::engine::{reduce, BaseArea, EngineCfg, Generation, Location};
    pub use crate::error::{CoreError, Result};
    pub use crate::events::{CoreEvent, EventLog, EventSink, NullSink};
    pub use crate::persist::{DirPersistence, MemoryPersistence, Persistence};
    pub use crate::question::{
        Question, QuestionKey, QuestionKind, RadiusQuestion, ThermometerQuestion,
    };
    pub use crate::refine::{ContradictionPolicy, Elimination};
    pub use crate::region::{BBox, CandidateRegion, Distance, Unit};
    pub use crate::session::{spawn_session, Session, SessionHandle, StationRequest};
    pub use crate::snapshot::Snapshot;
    pub use crate::stations::{
        GeodataSource, RawElement, StationCache, StationFeature, StationId, StationQuery,
        StationSet,
    };
    pub use crate::store::Settings;
}
