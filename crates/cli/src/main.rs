use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geo_types::Point;
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

use hidezone::prelude::*;
use hidezone::snapshot::{decode_base, region_to_geojson};
use hidezone::stations::parse_overpass;

/// Last station search result, stored next to the session state.
const STATIONS_FILE: &str = "stations.json";

#[derive(Parser)]
#[command(name = "hidezone")]
#[command(about = "Narrow down where the hider can be")]
struct Cmd {
    /// State directory; defaults to the platform data dir
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Summary of the hiding zone and the candidate region
    Status,
    /// List questions with their keys
    List,
    /// Hider is within (or with --outside, beyond) a distance of a point
    AddRadius {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        #[arg(long, default_value_t = 50.0)]
        radius: f64,
        #[arg(long, default_value = "km")]
        unit: Unit,
        #[arg(long)]
        outside: bool,
    },
    /// Moving from A to B got warmer (or with --colder, colder)
    AddThermometer {
        #[arg(long)]
        lat_a: f64,
        #[arg(long)]
        lng_a: f64,
        #[arg(long)]
        lat_b: f64,
        #[arg(long)]
        lng_b: f64,
        #[arg(long)]
        colder: bool,
    },
    /// Remove a question by key
    Remove {
        #[arg(long)]
        key: u64,
    },
    /// Use a circular zone as the base area
    Zone {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        #[arg(long, default_value_t = 50.0)]
        radius: f64,
        #[arg(long)]
        name: Option<String>,
    },
    /// Use a GeoJSON polygon (Feature, FeatureCollection or geometry) as the base area
    Polygon {
        #[arg(long)]
        file: PathBuf,
    },
    /// Show or change settings
    Settings {
        #[arg(long)]
        hiding_radius: Option<f64>,
        #[arg(long)]
        unit: Option<Unit>,
        /// Replaces the station filter list; repeat for several
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        display_stations: Option<bool>,
    },
    /// Without --file print the Overpass query; with it, load a result
    Stations {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// The hider is not at this station
    Eliminate {
        #[arg(long)]
        id: String,
    },
    /// Undo an elimination
    Restore {
        #[arg(long)]
        id: String,
    },
    /// Print the share string, or a share URL under --url
    Export {
        #[arg(long)]
        url: Option<String>,
    },
    /// Load a share string, URL or snapshot JSON (`@path` reads a file)
    Import { input: String },
    /// Candidate region as GeoJSON
    Region,
}

/// Forwards core events to the log.
struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::RegionChanged(region) => {
                tracing::info!(parts = region.part_count(), "region_changed")
            }
            CoreEvent::FocusStation(id) => tracing::info!(station = %id, "focus_station"),
            CoreEvent::FitViewport { bbox, .. } => tracing::debug!(?bbox, "fit_viewport"),
            CoreEvent::ValidationError(msg) => tracing::error!("{msg}"),
            CoreEvent::Contradiction(id) => {
                tracing::warn!(station = %id, "no hiding spot is left")
            }
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    SubscriberBuilder::default()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cmd = Cmd::parse();
    let state_dir = match cmd.state_dir {
        Some(dir) => dir,
        None => default_state_dir()?,
    };
    let stdout = std::io::stdout();
    run(&state_dir, cmd.action, &mut stdout.lock())
}

fn default_state_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "hidezone")
        .context("no home directory to keep state in")?;
    Ok(dirs.data_dir().to_path_buf())
}

fn run(state_dir: &Path, action: Action, out: &mut impl Write) -> Result<()> {
    let persistence = DirPersistence::open(state_dir)
        .with_context(|| format!("opening state dir {}", state_dir.display()))?;
    let mut session = Session::new(persistence, TracingSink);
    load_stations(&mut session, state_dir)?;
    tracing::debug!(
        state_dir = %state_dir.display(),
        generation = %session.generation(),
        "session_ready"
    );

    let mutated = match action {
        Action::Status => {
            status(&session, out)?;
            false
        }
        Action::List => {
            for q in session.questions() {
                writeln!(out, "{}\t{}", q.key, describe(&q.kind))?;
            }
            false
        }
        Action::AddRadius {
            lat,
            lng,
            radius,
            unit,
            outside,
        } => {
            let key = session.add_question(QuestionKind::Radius(RadiusQuestion {
                center: Point::new(lng, lat),
                radius,
                unit,
                within: !outside,
            }))?;
            writeln!(out, "{key}")?;
            true
        }
        Action::AddThermometer {
            lat_a,
            lng_a,
            lat_b,
            lng_b,
            colder,
        } => {
            let key = session.add_question(QuestionKind::Thermometer(ThermometerQuestion {
                a: Point::new(lng_a, lat_a),
                b: Point::new(lng_b, lat_b),
                warmer: !colder,
            }))?;
            writeln!(out, "{key}")?;
            true
        }
        Action::Remove { key } => {
            session.remove_question(QuestionKey(key))?;
            true
        }
        Action::Zone {
            lat,
            lng,
            radius,
            name,
        } => {
            let point = Point::new(lng, lat);
            let location = match name {
                Some(name) => Location::named(point, &name),
                None => Location::new(point),
            };
            session.set_base_area(BaseArea::Zone {
                location,
                radius: Distance::kilometers(radius),
            })?;
            true
        }
        Action::Polygon { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let doc: Value = serde_json::from_str(&text).context("parsing GeoJSON")?;
            let Some(doc) = doc.as_object() else {
                bail!("{} is not a GeoJSON object", file.display());
            };
            let (base, _) = decode_base(doc)?;
            session.set_base_area(base)?;
            true
        }
        Action::Settings {
            hiding_radius,
            unit,
            filters,
            display_stations,
        } => {
            let changed = hiding_radius.is_some()
                || unit.is_some()
                || !filters.is_empty()
                || display_stations.is_some();
            if changed {
                session.update_settings(|s| {
                    if let Some(r) = hiding_radius {
                        s.hiding_radius = r;
                    }
                    if let Some(u) = unit {
                        s.unit = u;
                    }
                    if !filters.is_empty() {
                        s.station_filters = filters;
                    }
                    if let Some(d) = display_stations {
                        s.display_stations = d;
                    }
                })?;
            }
            writeln!(out, "{}", serde_json::to_string_pretty(session.settings())?)?;
            changed
        }
        Action::Stations { file: None } => {
            match session.station_request()? {
                Some(request) => writeln!(out, "{}", request.query.to_overpass())?,
                None => writeln!(out, "station display is off")?,
            }
            let preferred = session.settings().preferred_name_tag.clone();
            for s in session.stations().iter() {
                let name = s.display_name(&preferred).unwrap_or("");
                writeln!(out, "{}\t{:.6}\t{:.6}\t{name}", s.id, s.point.y(), s.point.x())?;
            }
            false
        }
        Action::Stations { file: Some(file) } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let set = StationSet::from_raw(&parse_overpass(&text)?);
            writeln!(out, "{} stations", set.len())?;
            session.apply_stations(session.generation(), Ok(set))?;
            fs::write(state_dir.join(STATIONS_FILE), text)
                .context("storing station result")?;
            false
        }
        Action::Eliminate { id } => {
            let outcome = session.eliminate_station(&StationId::new(id))?;
            if outcome.contradiction {
                writeln!(out, "contradiction: no hiding spot is left")?;
            }
            writeln!(out, "{:.3} km²", outcome.region.geodesic_area_km2())?;
            outcome.committed
        }
        Action::Restore { id } => {
            let restored = session.restore_station(&StationId::new(id.as_str()));
            if !restored {
                writeln!(out, "{id} was not eliminated")?;
            }
            restored
        }
        Action::Export { url: None } => {
            writeln!(out, "{}", session.share_string())?;
            false
        }
        Action::Export { url: Some(base) } => {
            writeln!(out, "{}", session.share_url(&base))?;
            false
        }
        Action::Import { input } => {
            let text = read_arg(&input)?;
            session.load_snapshot(&text)?;
            status(&session, out)?;
            true
        }
        Action::Region => {
            let doc = json!({
                "type": "Feature",
                "properties": {},
                "geometry": region_to_geojson(session.region()),
            });
            writeln!(out, "{}", serde_json::to_string(&doc)?)?;
            false
        }
    };

    // Every invocation is its own session, so the end of a command is the
    // only point at which unsaved edits could still be written.
    if mutated && !session.settings().auto_save {
        session.save()?;
    }
    Ok(())
}

fn load_stations(session: &mut Session, state_dir: &Path) -> Result<()> {
    let path = state_dir.join(STATIONS_FILE);
    if !path.exists() {
        return Ok(());
    }
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    match parse_overpass(&text) {
        Ok(raw) => {
            session.apply_stations(session.generation(), Ok(StationSet::from_raw(&raw)))?;
        }
        Err(e) => tracing::warn!(error = %e, "ignoring stored station result"),
    }
    Ok(())
}

/// `@path` reads the file, anything else is taken literally.
fn read_arg(input: &str) -> Result<String> {
    match input.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {path}")),
        None => Ok(input.to_string()),
    }
}

fn status(session: &Session, out: &mut impl Write) -> Result<()> {
    let snap = session.snapshot();
    let base = match &snap.base {
        BaseArea::Zone { location, radius } => format!(
            "zone {} ({:.5}, {:.5}) r={} {}",
            location.name().unwrap_or("-"),
            location.point.y(),
            location.point.x(),
            radius.value,
            radius.unit.as_str()
        ),
        BaseArea::Polygon(mp) => format!("polygon ({} parts)", mp.0.len()),
    };
    writeln!(out, "base: {base}")?;
    writeln!(out, "questions: {}", snap.questions.len())?;
    writeln!(out, "eliminated: {}", snap.disabled_stations.len())?;
    writeln!(
        out,
        "hiding radius: {} {}",
        snap.hiding_radius,
        snap.unit.as_str()
    )?;
    let region = session.region();
    match region.bbox() {
        Some(b) => writeln!(
            out,
            "region: {:.3} km² bbox [{:.5}, {:.5}, {:.5}, {:.5}]",
            region.geodesic_area_km2(),
            b.min_lng,
            b.min_lat,
            b.max_lng,
            b.max_lat
        )?,
        None => writeln!(out, "region: empty")?,
    }
    Ok(())
}

fn describe(kind: &QuestionKind) -> String {
    match kind {
        QuestionKind::Radius(r) => format!(
            "radius {} {} {} of ({:.5}, {:.5})",
            if r.within { "within" } else { "beyond" },
            r.radius,
            r.unit.as_str(),
            r.center.y(),
            r.center.x()
        ),
        QuestionKind::Thermometer(t) => format!(
            "thermometer ({:.5}, {:.5}) -> ({:.5}, {:.5}) {}",
            t.a.y(),
            t.a.x(),
            t.b.y(),
            t.b.x(),
            if t.warmer { "warmer" } else { "colder" }
        ),
    }
}
