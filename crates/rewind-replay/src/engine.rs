//! The replay engine
//!
//! A pure state machine over a loaded timeline. It owns the cursor, the
//! reconstructed state and the activity feed, and records what happened
//! as [`PlayerEvent`]s in an outbox. It never sleeps, spawns or reads from
//! storage: the async [`Player`](crate::Player) drives it with commands and
//! ticks, and tests drive it directly.
//!
//! ```text
//! Idle ──load──▶ Loading ──loaded──▶ Paused ◀──pause── Playing
//!   ▲               │                  │  ──play──▶      │
//!   └────failed─────┘                  ▼                 ▼
//!                                     seek            Ended (finalized, at end)
//! ```

use std::fmt;

use rewind_core::{EventEnvelope, SessionId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::activity::{ActivityCache, ActivityItem, ActivityIter};
use crate::config::{PlayerConfig, is_valid_speed};
use crate::error::{ReplayError, ReplayResult};
use crate::events::PlayerEvent;
use crate::reconstruct::Reconstructor;
use crate::state::ReplayState;
use crate::timeline::Timeline;

/// Playback state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// No session selected
    #[default]
    Idle,
    /// Fetching the session's events
    Loading,
    Playing,
    Paused,
    /// Reached the end of a finalized session
    Ended,
}

impl PlayerState {
    /// Whether a timeline is loaded
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Playing | Self::Paused | Self::Ended)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Observable summary of a player
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub session: Option<SessionId>,
    pub state: PlayerState,
    /// Cursor offset from session start in ms
    pub current_time: u64,
    pub total_duration: u64,
    pub speed: f64,
    pub skip_inactivity: bool,
    pub is_live: bool,
    pub event_count: usize,
    pub useful_count: usize,
    /// Feed position of the last useful event at or before the cursor
    pub active_item: Option<usize>,
    pub last_error: Option<String>,
}

/// Deterministic replay state machine
#[derive(Debug)]
pub struct ReplayEngine {
    config: PlayerConfig,
    speed: f64,
    skip_inactivity: bool,
    state: PlayerState,
    session: Option<SessionId>,
    timeline: Option<Timeline>,
    reconstructor: Reconstructor,
    activity: ActivityCache,
    current_time: u64,
    is_live: bool,
    active_item: Option<usize>,
    last_error: Option<String>,
    outbox: Vec<PlayerEvent>,
}

impl ReplayEngine {
    /// Create an idle engine
    pub fn new(config: PlayerConfig) -> Self {
        let speed = if is_valid_speed(config.speed) {
            config.speed
        } else {
            warn!(speed = config.speed, "Invalid configured speed, using 1.0");
            1.0
        };
        Self {
            speed,
            skip_inactivity: config.skip_inactivity,
            config,
            state: PlayerState::Idle,
            session: None,
            timeline: None,
            reconstructor: Reconstructor::new(),
            activity: ActivityCache::default(),
            current_time: 0,
            is_live: false,
            active_item: None,
            last_error: None,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Cursor offset from session start in ms
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    pub fn total_duration(&self) -> u64 {
        self.timeline.as_ref().map_or(0, Timeline::total_duration)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn skip_inactivity(&self) -> bool {
        self.skip_inactivity
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reconstructed state at the cursor
    pub fn replay_state(&self) -> &ReplayState {
        self.reconstructor.state()
    }

    /// The activity feed of the loaded timeline, from the beginning
    pub fn activity(&self) -> Option<ActivityIter<'_>> {
        self.timeline.as_ref().map(ActivityIter::new)
    }

    /// The highlighted feed item
    pub fn active_item(&mut self) -> Option<ActivityItem> {
        let position = self.active_item?;
        let timeline = self.timeline.as_ref()?;
        self.activity.get(timeline, position).cloned()
    }

    /// Drain the events recorded since the last call
    pub fn take_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Observable summary
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            session: self.session.clone(),
            state: self.state,
            current_time: self.current_time,
            total_duration: self.total_duration(),
            speed: self.speed,
            skip_inactivity: self.skip_inactivity,
            is_live: self.is_live,
            event_count: self.timeline.as_ref().map_or(0, Timeline::len),
            useful_count: self
                .timeline
                .as_ref()
                .map_or(0, |t| t.useful_indexes().len()),
            active_item: self.active_item,
            last_error: self.last_error.clone(),
        }
    }

    /// Select a session; the caller fetches its events
    pub fn begin_load(&mut self, session: SessionId) {
        debug!(session = %session, "Loading session");
        self.session = Some(session);
        self.timeline = None;
        self.reconstructor.reset();
        self.activity.clear();
        self.current_time = 0;
        self.is_live = false;
        self.active_item = None;
        self.last_error = None;
        self.set_state(PlayerState::Loading);
    }

    /// Install the fetched events; the cursor starts at 0, paused
    pub fn finish_load(&mut self, events: Vec<EventEnvelope>, is_live: bool) {
        let timeline = Timeline::new(events, self.config.filter.clone());
        debug!(
            events = timeline.len(),
            useful = timeline.useful_indexes().len(),
            total_duration = timeline.total_duration(),
            is_live,
            "Session loaded"
        );
        self.timeline = Some(timeline);
        self.is_live = is_live;
        self.move_to(0, false);
        self.set_state(PlayerState::Paused);
    }

    /// Record a failed fetch and return to idle
    pub fn fail_load(&mut self, error: &ReplayError) {
        warn!(error = %error, "Failed to load session");
        self.timeline = None;
        self.set_state(PlayerState::Idle);
        self.record_error(error.to_string());
    }

    /// Forget the loaded session
    pub fn unload(&mut self) {
        self.timeline = None;
        self.session = None;
        self.reconstructor.reset();
        self.activity.clear();
        self.current_time = 0;
        self.active_item = None;
        self.set_state(PlayerState::Idle);
    }

    /// Start playback, optionally from an offset
    ///
    /// Playing an ended session restarts it from the beginning.
    pub fn play(&mut self, from: Option<u64>) -> ReplayResult<()> {
        self.ensure_loaded()?;
        match from {
            Some(time) => self.seek(time)?,
            None if self.state == PlayerState::Ended => self.seek(0)?,
            None => {}
        }
        self.set_state(PlayerState::Playing);
        Ok(())
    }

    /// Pause playback, optionally moving the cursor first
    pub fn pause(&mut self, at: Option<u64>) -> ReplayResult<()> {
        self.ensure_loaded()?;
        if let Some(time) = at {
            self.seek(time)?;
        }
        if self.state == PlayerState::Playing {
            self.set_state(PlayerState::Paused);
        }
        Ok(())
    }

    /// Move the cursor to `time`, clamped to the timeline
    ///
    /// Playing and paused players keep their state; an ended player becomes
    /// paused unless the target is the very end.
    pub fn seek(&mut self, time: u64) -> ReplayResult<()> {
        self.ensure_loaded()?;
        let total = self.total_duration();
        let mut target = time.min(total);
        if self.skip_inactivity {
            target = self.skip_seek_target(target);
        }

        self.move_to(target, true);

        if self.state == PlayerState::Ended && (target < total || self.is_live) {
            self.set_state(PlayerState::Paused);
        }
        Ok(())
    }

    /// Advance playback by one tick
    ///
    /// Returns whether the cursor moved.
    pub fn tick(&mut self) -> bool {
        if self.state != PlayerState::Playing {
            return false;
        }

        let total = self.total_duration();
        let current = self.current_time;
        if current >= total {
            if !self.is_live {
                self.set_state(PlayerState::Ended);
            }
            return false;
        }

        let step = (self.config.tick_interval.as_millis() as f64 * self.speed).round() as u64;
        let mut target = current.saturating_add(step.max(1));
        if self.skip_inactivity
            && let Some(jump) = self.skip_tick_target(current, target)
        {
            target = jump;
        }
        let target = target.min(total);

        self.move_to(target, true);
        if target >= total && !self.is_live {
            self.set_state(PlayerState::Ended);
        }
        true
    }

    /// Change the playback speed
    pub fn set_speed(&mut self, speed: f64) -> ReplayResult<()> {
        if !is_valid_speed(speed) {
            return Err(ReplayError::InvalidSpeed(speed));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn set_skip_inactivity(&mut self, skip: bool) {
        self.skip_inactivity = skip;
    }

    /// Change speed and skip-inactivity together; nothing changes on error
    pub fn set_config(&mut self, speed: f64, skip_inactivity: bool) -> ReplayResult<()> {
        self.set_speed(speed)?;
        self.set_skip_inactivity(skip_inactivity);
        Ok(())
    }

    /// Extend a live session with newly visible events
    ///
    /// Playback is not interrupted. Returns the number of events added.
    pub fn append(&mut self, envelopes: Vec<EventEnvelope>) -> usize {
        let Some(timeline) = self.timeline.as_mut() else {
            return 0;
        };
        let added = timeline.extend(envelopes);
        if added == 0 {
            return 0;
        }

        let total_duration = timeline.total_duration();
        self.outbox.push(PlayerEvent::TimelineExtended {
            added,
            total_duration,
        });
        // Events sharing the cursor's offset belong to the current state
        self.move_to(self.current_time, false);
        added
    }

    /// Mark the loaded session finalized
    pub fn finalize(&mut self) {
        if !self.is_live {
            return;
        }
        self.is_live = false;
        if let Some(session) = self.session.clone() {
            self.outbox.push(PlayerEvent::SessionEnded { session });
        }
        if self.state == PlayerState::Playing && self.current_time >= self.total_duration() {
            self.set_state(PlayerState::Ended);
        }
    }

    /// Record an error for observers
    pub fn record_error(&mut self, message: String) {
        self.last_error = Some(message.clone());
        self.outbox.push(PlayerEvent::Error { message });
    }

    fn ensure_loaded(&self) -> ReplayResult<()> {
        if self.state.is_loaded() && self.timeline.is_some() {
            Ok(())
        } else {
            Err(ReplayError::NotLoaded(self.state))
        }
    }

    fn set_state(&mut self, to: PlayerState) {
        let from = self.state;
        if from != to {
            self.state = to;
            self.outbox.push(PlayerEvent::StateChanged { from, to });
        }
    }

    fn min_gap(&self) -> u64 {
        self.config.min_inactive_gap.as_millis() as u64
    }

    /// Where a tick from `current` should land instead of `proposed`, if
    /// the span ahead contains no useful event
    fn skip_tick_target(&self, current: u64, proposed: u64) -> Option<u64> {
        let timeline = self.timeline.as_ref()?;
        let next = timeline.next_useful_after(current);
        if next.is_some_and(|n| n <= proposed) {
            return None;
        }

        let destination = next.unwrap_or(timeline.total_duration());
        let span_start = timeline.prev_useful_at_or_before(current).unwrap_or(0);
        (destination > proposed && destination - span_start > self.min_gap()).then_some(destination)
    }

    /// Where a seek to `time` should land when skipping inactivity
    fn skip_seek_target(&self, time: u64) -> u64 {
        let Some(timeline) = self.timeline.as_ref() else {
            return time;
        };
        let destination = timeline
            .next_useful_at_or_after(time)
            .unwrap_or(timeline.total_duration());
        if destination == time {
            return time;
        }
        let span_start = timeline.prev_useful_at_or_before(time).unwrap_or(0);
        if destination - span_start > self.min_gap() {
            destination
        } else {
            time
        }
    }

    /// Move the cursor and resynchronize state and feed
    fn move_to(&mut self, target: u64, report_crossings: bool) {
        let Some(timeline) = self.timeline.as_ref() else {
            return;
        };

        let before = timeline.useful_count_at(self.current_time);
        let after = timeline.useful_count_at(target);
        self.reconstructor.seek_to(timeline, timeline.count_at(target));
        self.current_time = target;

        if report_crossings && after > before {
            for position in before..after {
                if let Some(item) = self.activity.get(timeline, position) {
                    self.outbox.push(PlayerEvent::crossed(item));
                }
            }
        }

        let active = after.checked_sub(1);
        if active != self.active_item {
            self.active_item = active;
            let sequence = active
                .and_then(|n| timeline.useful_indexes().get(n))
                .map(|index| timeline.events()[*index].sequence);
            self.outbox.push(PlayerEvent::ActiveItemChanged {
                position: active,
                sequence,
            });
        }
    }
}
