//! Optimistic per-post vote state.
//!
//! A [`VoteEngine`] holds the tally shown for one post and the caller's own
//! vote on it. Clicks are applied locally first and then persisted; a failed
//! request puts the previous `(tally, direction)` pair back exactly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::connection::ApiGateway;
use crate::error::ApiError;
use crate::persisted::VoteParams;
use crate::query_result::PostDetail;
use crate::session::SessionBroadcast;

/// Tri-state vote. Serialized as `-1`, `0` or `1`.
#[derive(Hash, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    Down,
    #[default]
    None,
    Up,
}

impl Direction {
    pub fn as_i8(self) -> i8 {
        match self {
            Direction::Down => -1,
            Direction::None => 0,
            Direction::Up => 1,
        }
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Direction::Down),
            0 => Ok(Direction::None),
            1 => Ok(Direction::Up),
            other => Err(format!("vote direction out of range: {}", other)),
        }
    }
}

impl From<Direction> for i8 {
    fn from(direction: Direction) -> i8 {
        direction.as_i8()
    }
}

/// Clicking the direction already held cancels it.
pub fn effective_direction(current: Direction, requested: Direction) -> Direction {
    if current == requested {
        Direction::None
    } else {
        requested
    }
}

pub fn tally_delta(current: Direction, effective: Direction) -> i64 {
    i64::from(effective.as_i8()) - i64::from(current.as_i8())
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteState {
    pub tally: i64,
    pub direction: Direction,
}

impl VoteState {
    pub fn new(tally: i64, direction: Direction) -> Self {
        VoteState { tally, direction }
    }

    /// The state after clicking `requested`, together with the direction
    /// that has to be sent. `None` when the click changes nothing or the
    /// tally cannot move any further.
    pub fn transition(self, requested: Direction) -> Option<(VoteState, Direction)> {
        let effective = effective_direction(self.direction, requested);
        let delta = tally_delta(self.direction, effective);

        if delta == 0 {
            return None;
        }

        let tally = self.tally.checked_add(delta)?;
        Some((VoteState::new(tally, effective), effective))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The request was acknowledged and the optimistic state stands.
    Applied(VoteState),
    /// Nothing to send.
    Unchanged(VoteState),
    /// Another request for this post is still in flight.
    Suppressed,
}

/// Vote state of one displayed post.
pub struct VoteEngine {
    post_id: String,
    state: Cell<VoteState>,
    in_flight: Cell<bool>,
    gateway: Rc<dyn ApiGateway>,
    session: SessionBroadcast,
    on_change: RefCell<Option<Rc<dyn Fn(VoteState)>>>,
}

impl VoteEngine {
    pub fn new(
        post_id: impl Into<String>,
        seed: VoteState,
        gateway: Rc<dyn ApiGateway>,
        session: SessionBroadcast,
    ) -> Self {
        VoteEngine {
            post_id: post_id.into(),
            state: Cell::new(seed),
            in_flight: Cell::new(false),
            gateway,
            session,
            on_change: RefCell::new(None),
        }
    }

    /// Seeds the engine from what the server reported for the post.
    pub fn for_post(
        post: &PostDetail,
        gateway: Rc<dyn ApiGateway>,
        session: SessionBroadcast,
    ) -> Self {
        VoteEngine::new(
            post.post.id.clone(),
            VoteState::new(post.vote_num, post.vote_status),
            gateway,
            session,
        )
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn state(&self) -> VoteState {
        self.state.get()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.get()
    }

    /// Called with the new state on every optimistic change and rollback.
    pub fn init_on_change(&self, on_change: Box<dyn Fn(VoteState)>) {
        *self.on_change.borrow_mut() = Some(Rc::from(on_change));
    }

    pub async fn apply_vote(&self, requested: Direction) -> Result<VoteOutcome, ApiError> {
        if !self.session.is_authenticated() {
            return Err(ApiError::Unauthenticated);
        }

        if self.in_flight.get() {
            debug!("vote on post {} already in flight", self.post_id);
            return Ok(VoteOutcome::Suppressed);
        }

        let before = self.state.get();
        let (after, effective) = match before.transition(requested) {
            Some(transition) => transition,
            None => return Ok(VoteOutcome::Unchanged(before)),
        };

        let _in_flight = InFlightGuard::acquire(&self.in_flight);
        self.set_state(after);

        let params = VoteParams {
            post_id: self.post_id.clone(),
            direction: effective,
        };

        match self.gateway.vote(&params).await {
            Ok(()) => {
                debug!(
                    "vote on post {} persisted: {:?} -> {:?}",
                    self.post_id, before, after
                );
                Ok(VoteOutcome::Applied(after))
            }
            Err(err) => {
                warn!("vote on post {} failed, rolling back: {}", self.post_id, err);
                self.set_state(before);

                if err.is_credential_revoked() {
                    self.session.clear();
                }

                Err(err)
            }
        }
    }

    fn set_state(&self, state: VoteState) {
        self.state.set(state);

        // the callback may replace itself
        let on_change = self.on_change.borrow().clone();
        if let Some(on_change) = on_change {
            on_change(state);
        }
    }
}

// Released on drop so an abandoned request does not lock the post forever.
struct InFlightGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        InFlightGuard { flag }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ScriptedGateway;
    use crate::session::{MemoryStore, SessionRecord, SessionUser};
    use futures_util::FutureExt;

    const ALL: [Direction; 3] = [Direction::Down, Direction::None, Direction::Up];

    fn logged_in() -> SessionBroadcast {
        let session = SessionBroadcast::new(MemoryStore::new());
        session.establish(&SessionRecord {
            token: "jwt".into(),
            user: SessionUser {
                id: "1".into(),
                username: "alice".into(),
            },
        });
        session
    }

    fn engine(
        tally: i64,
        direction: Direction,
        gateway: &Rc<ScriptedGateway>,
        session: &SessionBroadcast,
    ) -> VoteEngine {
        VoteEngine::new(
            "42",
            VoteState::new(tally, direction),
            gateway.clone(),
            session.clone(),
        )
    }

    #[test]
    fn test_direction_serde() {
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Direction::Down).unwrap(), "-1");
        assert_eq!(
            serde_json::from_str::<Direction>("0").unwrap(),
            Direction::None
        );
        assert!(serde_json::from_str::<Direction>("2").is_err());
    }

    #[test]
    fn test_delta_table() {
        use Direction::*;

        let table = [
            (None, Up, Up, 1),
            (None, Down, Down, -1),
            (Up, Up, None, -1),
            (Down, Down, None, 1),
            (Up, Down, Down, -2),
            (Down, Up, Up, 2),
        ];

        for (current, requested, effective, delta) in table {
            assert_eq!(effective_direction(current, requested), effective);
            assert_eq!(tally_delta(current, effective), delta);
        }
    }

    #[test]
    fn test_transition_matches_delta_for_every_pair() {
        for current in ALL {
            for requested in ALL {
                let state = VoteState::new(10, current);
                let effective = effective_direction(current, requested);

                match state.transition(requested) {
                    Some((after, sent)) => {
                        assert_eq!(sent, effective);
                        assert_eq!(after.direction, effective);
                        assert_eq!(after.tally, 10 + tally_delta(current, effective));
                        assert_ne!(after.tally, 10);
                    }
                    None => {
                        assert_eq!(current, Direction::None);
                        assert_eq!(requested, Direction::None);
                    }
                }
            }
        }
    }

    #[test]
    fn test_transition_stops_at_tally_bounds() {
        assert_eq!(
            VoteState::new(i64::MAX, Direction::None).transition(Direction::Up),
            None
        );
        assert_eq!(
            VoteState::new(i64::MIN + 1, Direction::Up).transition(Direction::Down),
            None
        );

        // moving away from the bound is still allowed
        assert_eq!(
            VoteState::new(i64::MAX, Direction::Up).transition(Direction::Up),
            Some((VoteState::new(i64::MAX - 1, Direction::None), Direction::None))
        );
    }

    #[tokio::test]
    async fn test_click_at_tally_bound_is_unchanged() {
        let gateway = Rc::new(ScriptedGateway::new());
        let session = logged_in();
        let engine = engine(i64::MAX, Direction::None, &gateway, &session);

        assert_eq!(
            engine.apply_vote(Direction::Up).await,
            Ok(VoteOutcome::Unchanged(VoteState::new(i64::MAX, Direction::None)))
        );
        assert!(gateway.votes().is_empty());
    }

    #[tokio::test]
    async fn test_click_sequence() {
        crate::init_logger();
        let gateway = Rc::new(ScriptedGateway::new());
        let session = logged_in();
        let engine = engine(10, Direction::None, &gateway, &session);

        let steps = [
            (Direction::Up, VoteState::new(11, Direction::Up)),
            (Direction::Up, VoteState::new(10, Direction::None)),
            (Direction::Down, VoteState::new(9, Direction::Down)),
            (Direction::Up, VoteState::new(11, Direction::Up)),
        ];

        for (click, expected) in steps {
            assert_eq!(
                engine.apply_vote(click).await,
                Ok(VoteOutcome::Applied(expected))
            );
            assert_eq!(engine.state(), expected);
        }

        let sent: Vec<Direction> = gateway.votes().iter().map(|v| v.direction).collect();
        assert_eq!(
            sent,
            vec![Direction::Up, Direction::None, Direction::Down, Direction::Up]
        );
        assert!(gateway.votes().iter().all(|v| v.post_id == "42"));
    }

    #[tokio::test]
    async fn test_unchanged_sends_nothing() {
        let gateway = Rc::new(ScriptedGateway::new());
        let session = logged_in();
        let engine = engine(3, Direction::None, &gateway, &session);

        assert_eq!(
            engine.apply_vote(Direction::None).await,
            Ok(VoteOutcome::Unchanged(VoteState::new(3, Direction::None)))
        );
        assert!(gateway.votes().is_empty());
    }

    #[test]
    fn test_unauthenticated_short_circuit() {
        let gateway = Rc::new(ScriptedGateway::new());
        let session = SessionBroadcast::new(MemoryStore::new());
        let engine = engine(5, Direction::Up, &gateway, &session);

        // resolves on the first poll
        let result = engine.apply_vote(Direction::Down).now_or_never();

        assert_eq!(result, Some(Err(ApiError::Unauthenticated)));
        assert_eq!(engine.state(), VoteState::new(5, Direction::Up));
        assert!(gateway.votes().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_on_every_failure_kind() {
        let failures = vec![
            ApiError::Network("connection refused".into()),
            ApiError::Validation("bad param".into()),
            ApiError::NotFound("no post".into()),
            ApiError::Unknown {
                code: 1005,
                msg: "vote repeated".into(),
            },
        ];

        for failure in failures {
            for current in ALL {
                for requested in [Direction::Up, Direction::Down] {
                    let gateway = Rc::new(ScriptedGateway::new());
                    gateway.fail_next_vote(failure.clone());
                    let session = logged_in();
                    let engine = engine(-7, current, &gateway, &session);

                    assert_eq!(engine.apply_vote(requested).await, Err(failure.clone()));
                    assert_eq!(engine.state(), VoteState::new(-7, current));
                    assert!(!engine.is_in_flight());
                    assert!(session.is_authenticated());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_on_change_sees_optimistic_state_and_rollback() {
        let gateway = Rc::new(ScriptedGateway::new());
        gateway.fail_next_vote(ApiError::Network("offline".into()));
        let session = logged_in();
        let engine = engine(0, Direction::None, &gateway, &session);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen0 = seen.clone();
        engine.init_on_change(Box::new(move |state| seen0.borrow_mut().push(state)));

        let _ = engine.apply_vote(Direction::Up).await;

        assert_eq!(
            *seen.borrow(),
            vec![
                VoteState::new(1, Direction::Up),
                VoteState::new(0, Direction::None)
            ]
        );
    }

    #[tokio::test]
    async fn test_on_change_may_replace_itself() {
        let gateway = Rc::new(ScriptedGateway::new());
        let session = logged_in();
        let engine = Rc::new(engine(0, Direction::None, &gateway, &session));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen0 = seen.clone();
        let weak_engine = Rc::downgrade(&engine);
        engine.init_on_change(Box::new(move |state| {
            seen0.borrow_mut().push(state);

            if let Some(engine) = weak_engine.upgrade() {
                let seen1 = seen0.clone();
                engine.init_on_change(Box::new(move |state| {
                    seen1.borrow_mut().push(VoteState::new(-state.tally, state.direction));
                }));
            }
        }));

        engine.apply_vote(Direction::Up).await.unwrap();
        engine.apply_vote(Direction::Up).await.unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![
                VoteState::new(1, Direction::Up),
                VoteState::new(0, Direction::None)
            ]
        );

        engine.apply_vote(Direction::Down).await.unwrap();
        assert_eq!(seen.borrow().last(), Some(&VoteState::new(1, Direction::Down)));
    }

    #[tokio::test]
    async fn test_credential_expired_clears_session() {
        let gateway = Rc::new(ScriptedGateway::new());
        gateway.fail_next_vote(ApiError::CredentialExpired("token expired".into()));
        let session = logged_in();
        let engine = engine(10, Direction::Down, &gateway, &session);

        let cleared = Rc::new(Cell::new(false));
        let cleared0 = cleared.clone();
        let session0 = session.clone();
        let _subscription = session.on_change(move || cleared0.set(session0.current().is_none()));

        let result = engine.apply_vote(Direction::Up).await;

        assert_eq!(
            result,
            Err(ApiError::CredentialExpired("token expired".into()))
        );
        assert_eq!(engine.state(), VoteState::new(10, Direction::Down));
        assert_eq!(session.current(), None);
        assert!(cleared.get());

        // the next click is rejected before reaching the network
        assert_eq!(
            engine.apply_vote(Direction::Up).await,
            Err(ApiError::Unauthenticated)
        );
        assert_eq!(gateway.votes().len(), 1);
    }

    #[tokio::test]
    async fn test_credential_invalid_clears_session() {
        let gateway = Rc::new(ScriptedGateway::new());
        gateway.fail_next_vote(ApiError::CredentialInvalid("need login".into()));
        let session = logged_in();
        let engine = engine(1, Direction::None, &gateway, &session);

        assert!(engine.apply_vote(Direction::Down).await.is_err());
        assert_eq!(engine.state(), VoteState::new(1, Direction::None));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_in_flight_suppresses_second_click() {
        let gateway = Rc::new(ScriptedGateway::new());
        let release = gateway.hold_next_vote();
        let session = logged_in();
        let engine = engine(10, Direction::None, &gateway, &session);

        let first = engine.apply_vote(Direction::Up);
        futures_util::pin_mut!(first);
        assert!(futures_util::poll!(first.as_mut()).is_pending());

        assert!(engine.is_in_flight());
        assert_eq!(engine.state(), VoteState::new(11, Direction::Up));

        assert_eq!(
            engine.apply_vote(Direction::Down).await,
            Ok(VoteOutcome::Suppressed)
        );
        assert_eq!(engine.state(), VoteState::new(11, Direction::Up));

        release.send(Ok(())).unwrap();
        assert_eq!(
            first.await,
            Ok(VoteOutcome::Applied(VoteState::new(11, Direction::Up)))
        );
        assert!(!engine.is_in_flight());
        assert_eq!(gateway.votes().len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_request_releases_guard() {
        let gateway = Rc::new(ScriptedGateway::new());
        let _release = gateway.hold_next_vote();
        let session = logged_in();
        let engine = engine(0, Direction::None, &gateway, &session);

        {
            let first = engine.apply_vote(Direction::Up);
            futures_util::pin_mut!(first);
            assert!(futures_util::poll!(first.as_mut()).is_pending());
            assert!(engine.is_in_flight());
        }

        assert!(!engine.is_in_flight());
    }

    #[test]
    fn test_for_post_seeds_from_detail() {
        let detail: PostDetail = serde_json::from_str(
            r#"{"id":"99","author_id":"2","community_id":1,"title":"t","content":"c",
                "author_name":"bob","vote_num":4,"vote_status":1}"#,
        )
        .unwrap();

        let engine = VoteEngine::for_post(
            &detail,
            Rc::new(ScriptedGateway::new()),
            SessionBroadcast::new(MemoryStore::new()),
        );

        assert_eq!(engine.post_id(), "99");
        assert_eq!(engine.state(), VoteState::new(4, Direction::Up));
    }
}
