//! Async host: one tokio task owns the [`Session`] and applies commands in
//! arrival order. Station fetches run beside it and post their results back
//! onto the same queue, tagged with the generation they were issued for.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::Session;
use crate::engine::{BaseArea, Generation};
use crate::error::{CoreError, Result, StationError};
use crate::question::{Question, QuestionKey, QuestionKind};
use crate::refine::Elimination;
use crate::region::CandidateRegion;
use crate::snapshot::Snapshot;
use crate::stations::{StationCache, StationFeature, StationId, StationSet};
use crate::store::Settings;

type Reply<T> = oneshot::Sender<T>;

pub enum Command {
    AddQuestion {
        kind: QuestionKind,
        reply: Reply<Result<QuestionKey>>,
    },
    RemoveQuestion {
        key: QuestionKey,
        reply: Reply<Result<Question>>,
    },
    /// Replace the question's contents.
    UpdateQuestion {
        key: QuestionKey,
        kind: QuestionKind,
        reply: Reply<Result<()>>,
    },
    SetBaseArea {
        base: BaseArea,
        reply: Reply<Result<()>>,
    },
    SetSettings {
        settings: Settings,
        reply: Reply<Result<()>>,
    },
    Eliminate {
        id: StationId,
        reply: Reply<Result<Elimination>>,
    },
    Restore {
        id: StationId,
        reply: Reply<bool>,
    },
    LoadSnapshot {
        text: String,
        reply: Reply<Result<()>>,
    },
    Snapshot {
        reply: Reply<Snapshot>,
    },
    Region {
        reply: Reply<CandidateRegion>,
    },
    Stations {
        reply: Reply<StationSet>,
    },
    Save {
        reply: Reply<Result<()>>,
    },
    /// Posted by fetch tasks.
    StationsFetched {
        generation: Generation,
        result: std::result::Result<Arc<[StationFeature]>, StationError>,
    },
    Shutdown,
}

/// Cheap, clonable front end of a running session task.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: UnboundedSender<Command>,
}

impl SessionHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)
    }

    pub async fn add_question(&self, kind: QuestionKind) -> Result<QuestionKey> {
        self.call(|reply| Command::AddQuestion { kind, reply }).await?
    }

    pub async fn remove_question(&self, key: QuestionKey) -> Result<Question> {
        self.call(|reply| Command::RemoveQuestion { key, reply }).await?
    }

    pub async fn update_question(&self, key: QuestionKey, kind: QuestionKind) -> Result<()> {
        self.call(|reply| Command::UpdateQuestion { key, kind, reply })
            .await?
    }

    pub async fn set_base_area(&self, base: BaseArea) -> Result<()> {
        self.call(|reply| Command::SetBaseArea { base, reply }).await?
    }

    pub async fn set_settings(&self, settings: Settings) -> Result<()> {
        self.call(|reply| Command::SetSettings { settings, reply })
            .await?
    }

    pub async fn eliminate_station(&self, id: StationId) -> Result<Elimination> {
        self.call(|reply| Command::Eliminate { id, reply }).await?
    }

    pub async fn restore_station(&self, id: StationId) -> Result<bool> {
        self.call(|reply| Command::Restore { id, reply }).await
    }

    pub async fn load_snapshot(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.call(|reply| Command::LoadSnapshot { text, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    pub async fn region(&self) -> Result<CandidateRegion> {
        self.call(|reply| Command::Region { reply }).await
    }

    pub async fn stations(&self) -> Result<StationSet> {
        self.call(|reply| Command::Stations { reply }).await
    }

    pub async fn save(&self) -> Result<()> {
        self.call(|reply| Command::Save { reply }).await?
    }

    /// Ask the task to stop; it hands the session back through its
    /// `JoinHandle`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Start the session task. The task ends on [`SessionHandle::shutdown`] or
/// when every handle is dropped, and returns the session.
pub fn spawn_session(
    session: Session,
    cache: Arc<StationCache>,
) -> (SessionHandle, JoinHandle<Session>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let weak = tx.downgrade();
    let join = tokio::spawn(run(session, cache, rx, weak));
    (SessionHandle { tx }, join)
}

async fn run(
    mut session: Session,
    cache: Arc<StationCache>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    weak: WeakUnboundedSender<Command>,
) -> Session {
    let mut requested: Option<Generation> = None;
    request_stations(&mut session, &cache, &weak, &mut requested);
    while let Some(cmd) = rx.recv().await {
        if matches!(cmd, Command::Shutdown) {
            break;
        }
        dispatch(&mut session, cmd);
        request_stations(&mut session, &cache, &weak, &mut requested);
    }
    tracing::debug!(generation = %session.generation(), "session_task_stopped");
    session
}

fn dispatch(session: &mut Session, cmd: Command) {
    // A dropped reply receiver just means the caller stopped waiting.
    match cmd {
        Command::AddQuestion { kind, reply } => {
            let _ = reply.send(session.add_question(kind));
        }
        Command::RemoveQuestion { key, reply } => {
            let _ = reply.send(session.remove_question(key));
        }
        Command::UpdateQuestion { key, kind, reply } => {
            let _ = reply.send(session.update_question(key, |q| *q = kind));
        }
        Command::SetBaseArea { base, reply } => {
            let _ = reply.send(session.set_base_area(base));
        }
        Command::SetSettings { settings, reply } => {
            let _ = reply.send(session.set_settings(settings));
        }
        Command::Eliminate { id, reply } => {
            let _ = reply.send(session.eliminate_station(&id));
        }
        Command::Restore { id, reply } => {
            let _ = reply.send(session.restore_station(&id));
        }
        Command::LoadSnapshot { text, reply } => {
            let _ = reply.send(session.load_snapshot(&text));
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(session.snapshot());
        }
        Command::Region { reply } => {
            let _ = reply.send(session.region().clone());
        }
        Command::Stations { reply } => {
            let _ = reply.send(session.stations().clone());
        }
        Command::Save { reply } => {
            let _ = reply.send(session.save());
        }
        Command::StationsFetched { generation, result } => {
            if let Err(e) = session.apply_stations(generation, result.map(StationSet::new)) {
                tracing::warn!(error = %e, "station refresh failed");
            }
        }
        Command::Shutdown => {}
    }
}

/// Issue a fetch whenever the generation moved since the last one.
fn request_stations(
    session: &mut Session,
    cache: &Arc<StationCache>,
    weak: &WeakUnboundedSender<Command>,
    requested: &mut Option<Generation>,
) {
    let generation = session.generation();
    if *requested == Some(generation) {
        return;
    }
    *requested = Some(generation);
    let request = match session.station_request() {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(error = %e, "no station search");
            return;
        }
    };
    let cache = cache.clone();
    let weak = weak.clone();
    tokio::spawn(async move {
        let result = cache.fetch(&request.query).await;
        if let Some(tx) = weak.upgrade() {
            let _ = tx.send(Command::StationsFetched {
                generation: request.generation,
                result,
            });
        }
    });
}
