/// Per-popup session: which tab we are, and whether it is in a room
///
/// [`Session`] is a plain reducer over [`SessionAction`]. [`Coordinator`]
/// owns one, performs the browser calls for each user action and feeds the
/// results back in. The durable store is the source of truth; the session
/// only caches the last value it observed.

use crate::background::BackgroundClient;
use crate::detection::{DetectResponse, VideoDetector};
use crate::error::SessionError;
use crate::room_code::{validate_room_code, RoomCode};
use crate::rooms::{delete_room, room_for, store_room, TabId};
use crate::store::{RoomStore, Subscription};
use futures::stream::FuturesUnordered;
use futures::{select_biased, StreamExt};
use std::cell::RefCell;

/// Video detection status while in a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Detecting,
    Detected,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Tab id not known yet
    #[default]
    Unresolved,
    NoRoom {
        tab_id: TabId,
    },
    InRoom {
        tab_id: TabId,
        room: RoomCode,
        detection: Detection,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    TabResolved(TabId),
    /// A new stored value was observed (from any instance)
    RoomsChanged(Option<String>),
    /// This instance wrote `rooms`, which now contains `room` for our tab
    RoomEntered { rooms: String, room: RoomCode },
    RoomExited { rooms: String },
    DetectionFinished { room: RoomCode, response: DetectResponse },
    /// A create or join started (`true`) or settled (`false`)
    Busy(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    state: SessionState,
    rooms: Option<String>,
    busy: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reduce(&self, action: SessionAction) -> Session {
        match action {
            SessionAction::TabResolved(tab_id) => match self.state {
                SessionState::Unresolved => Session {
                    state: derive_state(tab_id, self.rooms.as_deref(), &self.state),
                    ..self.clone()
                },
                // Resolves once per popup
                _ => self.clone(),
            },
            SessionAction::RoomsChanged(rooms) => self.observe(rooms),
            SessionAction::RoomEntered { rooms, room } => match self.tab_id() {
                Some(tab_id) => Session {
                    state: SessionState::InRoom {
                        tab_id,
                        detection: carried_detection(&self.state, &room),
                        room,
                    },
                    rooms: Some(rooms),
                    busy: self.busy,
                },
                None => self.clone(),
            },
            SessionAction::RoomExited { rooms } => match self.tab_id() {
                Some(tab_id) => Session {
                    state: SessionState::NoRoom { tab_id },
                    rooms: Some(rooms),
                    busy: self.busy,
                },
                None => self.clone(),
            },
            SessionAction::DetectionFinished { room, response } => match &self.state {
                SessionState::InRoom {
                    tab_id,
                    room: current,
                    ..
                } if *current == room => {
                    let detection = match response {
                        DetectResponse::Success => Detection::Detected,
                        DetectResponse::Error { message } => Detection::Failed(message),
                    };
                    Session {
                        state: SessionState::InRoom {
                            tab_id: *tab_id,
                            room,
                            detection,
                        },
                        ..self.clone()
                    }
                }
                // Stale result for a room we already left
                _ => self.clone(),
            },
            SessionAction::Busy(busy) => Session {
                busy,
                ..self.clone()
            },
        }
    }

    fn observe(&self, rooms: Option<String>) -> Session {
        let state = match self.tab_id() {
            Some(tab_id) => derive_state(tab_id, rooms.as_deref(), &self.state),
            None => SessionState::Unresolved,
        };
        Session {
            state,
            rooms,
            busy: self.busy,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Last stored value this session observed
    pub fn rooms(&self) -> Option<&str> {
        self.rooms.as_deref()
    }

    pub fn tab_id(&self) -> Option<TabId> {
        match self.state {
            SessionState::Unresolved => None,
            SessionState::NoRoom { tab_id } | SessionState::InRoom { tab_id, .. } => Some(tab_id),
        }
    }

    pub fn in_room(&self) -> bool {
        matches!(self.state, SessionState::InRoom { .. })
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        match &self.state {
            SessionState::InRoom { room, .. } => Some(room),
            _ => None,
        }
    }

    pub fn detection(&self) -> Option<&Detection> {
        match &self.state {
            SessionState::InRoom { detection, .. } => Some(detection),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self.detection() {
            Some(Detection::Failed(message)) => Some(message),
            _ => None,
        }
    }

    /// A create or join is in flight
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Create and join need a known tab that is not in a room yet, and no
    /// other create or join running
    pub fn can_create_or_join(&self) -> bool {
        matches!(self.state, SessionState::NoRoom { .. }) && !self.busy
    }
}

/// Membership comes from the stored map
fn derive_state(tab_id: TabId, rooms: Option<&str>, previous: &SessionState) -> SessionState {
    match room_for(rooms, tab_id) {
        None => SessionState::NoRoom { tab_id },
        Some(room) => SessionState::InRoom {
            tab_id,
            detection: carried_detection(previous, &room),
            room,
        },
    }
}

/// Detection status carries over only while the room stays the same
fn carried_detection(previous: &SessionState, room: &RoomCode) -> Detection {
    match previous {
        SessionState::InRoom {
            room: current,
            detection,
            ..
        } if current == room => detection.clone(),
        _ => Detection::Detecting,
    }
}

/// Room the session just moved into, if the transition should start detection
fn entered_room(before: &Session, after: &Session) -> Option<RoomCode> {
    let room = after.room_code()?;
    if before.room_code() == Some(room) {
        None
    } else {
        Some(room.clone())
    }
}

/// Drives one popup's session against the browser
pub struct Coordinator<B, S, D> {
    background: B,
    store: S,
    detector: D,
    session: RefCell<Session>,
    listener: Box<dyn Fn(&Session)>,
}

impl<B, S, D> Coordinator<B, S, D> {
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one action. Returns the room to run detection for when the
    /// action moved the session into a room.
    fn apply(&self, action: SessionAction) -> Option<RoomCode> {
        let (before, after) = {
            let mut session = self.session.borrow_mut();
            let before = session.clone();
            *session = before.reduce(action);
            (before, session.clone())
        };

        if before == after {
            return None;
        }

        log::debug!("Session {:?} -> {:?}", before.state, after.state);
        (self.listener)(&after);
        entered_room(&before, &after)
    }

    /// Claim the tab for one create or join. Released when the guard drops.
    fn begin_action(&self) -> Result<(TabId, ActionGuard<'_, B, S, D>), SessionError> {
        let tab_id = {
            let session = self.session.borrow();
            match session.state() {
                SessionState::Unresolved => {
                    return Err(SessionError::InvalidState("tab id not resolved"));
                }
                SessionState::InRoom { .. } => {
                    return Err(SessionError::InvalidState("already in a room"));
                }
                SessionState::NoRoom { .. } if session.is_busy() => {
                    return Err(SessionError::InvalidState("another room action is running"));
                }
                SessionState::NoRoom { tab_id } => *tab_id,
            }
        };

        self.apply(SessionAction::Busy(true));
        Ok((tab_id, ActionGuard { coordinator: self }))
    }
}

/// Clears the busy flag on every exit path of a create or join
struct ActionGuard<'a, B, S, D> {
    coordinator: &'a Coordinator<B, S, D>,
}

impl<B, S, D> Drop for ActionGuard<'_, B, S, D> {
    fn drop(&mut self) {
        self.coordinator.apply(SessionAction::Busy(false));
    }
}

impl<B, S, D> Coordinator<B, S, D>
where
    B: BackgroundClient,
    S: RoomStore,
    D: VideoDetector,
{
    pub fn new(background: B, store: S, detector: D) -> Self {
        Coordinator {
            background,
            store,
            detector,
            session: RefCell::new(Session::new()),
            listener: Box::new(|_| ()),
        }
    }

    /// Called with the new session after every change
    pub fn on_change(mut self, listener: impl Fn(&Session) + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    /// Load the stored map and resolve which tab this popup belongs to
    pub async fn start(&self) -> Result<TabId, SessionError> {
        match self.store.read().await {
            Ok(rooms) => {
                self.apply(SessionAction::RoomsChanged(rooms));
            }
            Err(e) => log::warn!("Failed to read rooms: {}", e),
        }

        let tab_id = self.background.get_tab_id().await.map_err(|e| {
            log::warn!("Failed to resolve tab id: {}", e);
            e
        })?;

        log::debug!("Resolved tab id {}", tab_id);
        if let Some(room) = self.apply(SessionAction::TabResolved(tab_id)) {
            self.detect(room).await;
        }
        Ok(tab_id)
    }

    /// Ask the background for a fresh room and join it
    pub async fn create_room(&self) -> Result<RoomCode, SessionError> {
        let (tab_id, guard) = self.begin_action()?;

        let room = self.background.create_room().await.map_err(|e| {
            log::warn!("Failed to create room: {}", e);
            e
        })?;

        log::info!("Created room {}", room);
        let detect = self.enter_room(tab_id, &room).await?;
        drop(guard);

        if let Some(room) = detect {
            self.detect(room).await;
        }
        Ok(room)
    }

    /// Join the room typed into the form
    pub async fn join_room(&self, input: &str) -> Result<RoomCode, SessionError> {
        let room = validate_room_code(input)?;
        let (tab_id, guard) = self.begin_action()?;

        log::info!("Joining room {}", room);
        let detect = self.enter_room(tab_id, &room).await?;
        drop(guard);

        if let Some(room) = detect {
            self.detect(room).await;
        }
        Ok(room)
    }

    pub async fn exit_room(&self) -> Result<(), SessionError> {
        let session = self.session();
        let (Some(tab_id), Some(room)) = (session.tab_id(), session.room_code()) else {
            return Err(SessionError::InvalidState("not in a room"));
        };

        let rooms = self
            .store
            .update(|current| delete_room(current, tab_id))
            .await
            .map_err(|e| {
                log::warn!("Failed to leave room: {}", e);
                e
            })?;

        log::info!("Left room {}", room);
        self.apply(SessionAction::RoomExited { rooms });
        Ok(())
    }

    /// Follow store changes from every instance until the subscription ends.
    /// Detection for rooms entered this way runs alongside.
    pub async fn watch(&self, updates: Subscription) {
        let mut updates = updates.fuse();
        let mut detections = FuturesUnordered::new();

        loop {
            select_biased! {
                () = detections.select_next_some() => {}
                rooms = updates.next() => match rooms {
                    Some(rooms) => {
                        if let Some(room) = self.apply(SessionAction::RoomsChanged(rooms)) {
                            detections.push(self.detect(room));
                        }
                    }
                    None => break,
                },
            }
        }

        while detections.next().await.is_some() {}
    }

    /// Ask the page whether it has a video and record the answer
    pub async fn detect(&self, room: RoomCode) {
        let response = match self.detector.detect_video().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Video detection failed: {}", e);
                DetectResponse::Error {
                    message: e.to_string(),
                }
            }
        };

        self.apply(SessionAction::DetectionFinished { room, response });
    }

    /// Write our entry and move into the room. Returns the room to run
    /// detection for, unless a store update already started it.
    async fn enter_room(&self, tab_id: TabId, room: &RoomCode) -> Result<Option<RoomCode>, SessionError> {
        let rooms = self
            .store
            .update(|current| store_room(current, tab_id, room.clone()))
            .await
            .map_err(|e| {
                log::warn!("Failed to save room: {}", e);
                e
            })?;

        Ok(self.apply(SessionAction::RoomEntered {
            rooms,
            room: room.clone(),
        }))
    }
}
