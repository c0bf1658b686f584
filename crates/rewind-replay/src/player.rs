//! Async player
//!
//! [`Player`] is a cloneable handle to a background task that owns a
//! [`ReplayEngine`]. Commands travel over an mpsc channel and are answered
//! through oneshot replies; the task ticks the engine while playing and
//! publishes what happened three ways:
//!
//! - a [`watch`] channel holding the latest [`PlayerSnapshot`]
//! - a [`broadcast`] channel of [`PlayerEvent`]s
//! - callbacks registered with [`Player::on`]

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rewind_core::{EventEnvelope, SessionId};
use rewind_storage::{StorageError, TimelineStore};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::activity::ActivityItem;
use crate::config::PlayerConfig;
use crate::engine::{PlayerSnapshot, PlayerState, ReplayEngine};
use crate::error::{ReplayError, ReplayResult};
use crate::events::{PlayerEvent, PlayerEventKind};

type Callback = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;
type Callbacks = Arc<Mutex<Vec<(PlayerEventKind, Callback)>>>;
type Reply<T> = oneshot::Sender<T>;

enum Command {
    Load {
        session: SessionId,
        reply: Reply<ReplayResult<()>>,
    },
    Play {
        from: Option<u64>,
        reply: Reply<ReplayResult<()>>,
    },
    Pause {
        at: Option<u64>,
        reply: Reply<ReplayResult<()>>,
    },
    Seek {
        time: u64,
        reply: Reply<ReplayResult<()>>,
    },
    SetConfig {
        speed: Option<f64>,
        skip_inactivity: Option<bool>,
        reply: Reply<ReplayResult<()>>,
    },
    Append {
        envelopes: Vec<EventEnvelope>,
        reply: Reply<usize>,
    },
    Finalize {
        reply: Reply<()>,
    },
    Activity {
        reply: Reply<Vec<ActivityItem>>,
    },
    Close {
        reply: Reply<()>,
    },
}

/// Handle to a running player task
#[derive(Clone)]
pub struct Player {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<PlayerSnapshot>,
    events: broadcast::Sender<PlayerEvent>,
    callbacks: Callbacks,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("snapshot", &*self.snapshot.borrow())
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl Player {
    /// Spawn a player task reading sessions from `store`
    ///
    /// Must be called from within a tokio runtime. The task stops when
    /// [`Player::close`] is called or every handle is dropped.
    pub fn spawn(store: Arc<dyn TimelineStore>, config: PlayerConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let engine = ReplayEngine::new(config.clone());
        let (snapshot_tx, snapshot) = watch::channel(engine.snapshot());
        let callbacks: Callbacks = Arc::default();

        let mut ticker = tokio::time::interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = PlayerTask {
            engine,
            store,
            commands: command_rx,
            ticker,
            snapshot: snapshot_tx,
            events: events.clone(),
            callbacks: Arc::clone(&callbacks),
        };
        tokio::spawn(task.run());

        Self {
            commands,
            snapshot,
            events,
            callbacks,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> ReplayResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ReplayError::Closed)?;
        response.await.map_err(|_| ReplayError::Closed)
    }

    /// Load a session; resolves once it is paused at the start or failed
    pub async fn load(&self, session: SessionId) -> ReplayResult<()> {
        self.request(|reply| Command::Load { session, reply }).await?
    }

    /// Start playback, optionally from an offset in ms
    pub async fn play(&self, from: Option<u64>) -> ReplayResult<()> {
        self.request(|reply| Command::Play { from, reply }).await?
    }

    /// Pause playback, optionally at an offset in ms
    pub async fn pause(&self, at: Option<u64>) -> ReplayResult<()> {
        self.request(|reply| Command::Pause { at, reply }).await?
    }

    /// Move the cursor to an offset in ms
    pub async fn seek(&self, time: u64) -> ReplayResult<()> {
        self.request(|reply| Command::Seek { time, reply }).await?
    }

    /// Change speed and/or skip-inactivity; `None` keeps the current value
    pub async fn set_config(
        &self,
        speed: Option<f64>,
        skip_inactivity: Option<bool>,
    ) -> ReplayResult<()> {
        self.request(|reply| Command::SetConfig {
            speed,
            skip_inactivity,
            reply,
        })
        .await?
    }

    pub async fn set_speed(&self, speed: f64) -> ReplayResult<()> {
        self.set_config(Some(speed), None).await
    }

    pub async fn set_skip_inactivity(&self, skip: bool) -> ReplayResult<()> {
        self.set_config(None, Some(skip)).await
    }

    /// Extend the loaded live session; returns the number of events added
    pub async fn append(&self, envelopes: Vec<EventEnvelope>) -> ReplayResult<usize> {
        self.request(|reply| Command::Append { envelopes, reply })
            .await
    }

    /// Mark the loaded session finalized
    pub async fn finalize(&self) -> ReplayResult<()> {
        self.request(|reply| Command::Finalize { reply }).await
    }

    /// The full activity feed of the loaded session
    pub async fn activity(&self) -> ReplayResult<Vec<ActivityItem>> {
        self.request(|reply| Command::Activity { reply }).await
    }

    /// Stop the player task
    pub async fn close(&self) -> ReplayResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Whether the player task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Resolves once the player task has stopped
    pub async fn closed(&self) {
        self.commands.closed().await;
    }

    /// Cursor offset in ms
    pub fn current_time(&self) -> u64 {
        self.snapshot.borrow().current_time
    }

    pub fn state(&self) -> PlayerState {
        self.snapshot.borrow().state
    }

    /// The loaded (or loading) session
    pub fn session(&self) -> Option<SessionId> {
        self.snapshot.borrow().session.clone()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that changes whenever a new snapshot is published
    pub fn watch(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }

    /// Receive every player event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Invoke `callback` for every event of `kind`
    ///
    /// Callbacks run on the player task and must not block.
    pub fn on<F>(&self, kind: PlayerEventKind, callback: F)
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, Arc::new(callback)));
    }
}

struct PlayerTask {
    engine: ReplayEngine,
    store: Arc<dyn TimelineStore>,
    commands: mpsc::Receiver<Command>,
    ticker: Interval,
    snapshot: watch::Sender<PlayerSnapshot>,
    events: broadcast::Sender<PlayerEvent>,
    callbacks: Callbacks,
}

impl PlayerTask {
    async fn run(mut self) {
        debug!("Player task started");

        loop {
            let playing = self.engine.state() == PlayerState::Playing;
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All player handles dropped");
                        break;
                    };
                    if !self.handle(command).await {
                        break;
                    }
                }
                _ = self.ticker.tick(), if playing => {
                    self.engine.tick();
                }
            }
            self.publish();
        }

        debug!("Player task stopped");
    }

    /// Execute one command; returns false when the task should stop
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Load { session, reply } => {
                let result = self.load(session).await;
                self.respond(reply, result);
            }
            Command::Play { from, reply } => {
                let result = self.engine.play(from);
                self.ticker.reset();
                self.reply(reply, result);
            }
            Command::Pause { at, reply } => {
                let result = self.engine.pause(at);
                self.reply(reply, result);
            }
            Command::Seek { time, reply } => {
                let result = self.engine.seek(time);
                self.ticker.reset();
                self.reply(reply, result);
            }
            Command::SetConfig {
                speed,
                skip_inactivity,
                reply,
            } => {
                let speed = speed.unwrap_or(self.engine.speed());
                let skip = skip_inactivity.unwrap_or(self.engine.skip_inactivity());
                let result = self.engine.set_config(speed, skip);
                self.reply(reply, result);
            }
            Command::Append { envelopes, reply } => {
                let added = self.engine.append(envelopes);
                self.respond(reply, added);
            }
            Command::Finalize { reply } => {
                self.engine.finalize();
                self.respond(reply, ());
            }
            Command::Activity { reply } => {
                let items = self
                    .engine
                    .activity()
                    .map(Iterator::collect::<Vec<_>>)
                    .unwrap_or_default();
                self.respond(reply, items);
            }
            Command::Close { reply } => {
                info!("Player closing");
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    #[instrument(skip(self), fields(session = %session))]
    async fn load(&mut self, session: SessionId) -> ReplayResult<()> {
        self.engine.begin_load(session.clone());
        self.publish();

        let fetched = async {
            let meta = self.store.session(&session).await?;
            let events = self.store.read_all(&session).await?;
            Ok::<_, StorageError>((events, meta.is_live))
        }
        .await;

        match fetched {
            Ok((events, is_live)) => {
                self.engine.finish_load(events, is_live);
                Ok(())
            }
            Err(source) => {
                let err = ReplayError::Load { session, source };
                self.engine.fail_load(&err);
                Err(err)
            }
        }
    }

    fn reply(&mut self, reply: Reply<ReplayResult<()>>, result: ReplayResult<()>) {
        if let Err(e) = &result {
            warn!(error = %e, "Player command failed");
            self.engine.record_error(e.to_string());
        }
        self.respond(reply, result);
    }

    /// Publish pending events before answering, so callers observe them
    fn respond<T>(&mut self, reply: Reply<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    fn publish(&mut self) {
        let events = self.engine.take_events();
        for event in &events {
            let kind = event.kind();
            // Released before invoking, callbacks may register more callbacks
            let matching: Vec<Callback> = self
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            for callback in matching {
                callback(event);
            }
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }
        self.snapshot.send_if_modified(|current| {
            let next = self.engine.snapshot();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
