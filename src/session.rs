//! Generation sessions: per-user single flight, event history and fan-out.
//!
//! The registry is the only owner of session state and of the user to active
//! session mapping. Everything lives behind one lock and callers only ever get
//! copies or channel receivers back.
//!
//! Each session keeps the events emitted so far. A subscriber first receives
//! that history, then live events; its channel closes right after the
//! terminal `complete` or `error` event.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{GenerationEvent, Question, SessionState};
use crate::error::{GenerationError, SessionError};
use crate::orchestrator::ProgressSink;

struct SessionEntry {
  owner: String,
  state: SessionState,
  started: Instant,
  history: Vec<GenerationEvent>,
  subscribers: Vec<UnboundedSender<GenerationEvent>>,
  cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
  sessions: HashMap<Uuid, SessionEntry>,
  active_by_user: HashMap<String, Uuid>,
}

pub struct SessionRegistry {
  inner: Mutex<RegistryInner>,
  grace: Duration,
}

impl SessionRegistry {
  /// `grace` is how long a finished session stays subscribable.
  pub fn new(grace: Duration) -> Self {
    Self { inner: Mutex::new(RegistryInner::default()), grace }
  }

  /// Open a session for `user`. Fails while the user already has one processing.
  pub fn create(&self, user: &str) -> Result<Uuid, SessionError> {
    let mut inner = self.inner.lock();
    if let Some(existing) = inner.active_by_user.get(user) {
      warn!(target: "session", %user, active = %existing, "Rejected concurrent generation");
      return Err(SessionError::ConcurrentGenerationConflict);
    }
    let id = Uuid::new_v4();
    inner.sessions.insert(
      id,
      SessionEntry {
        owner: user.to_string(),
        state: SessionState::Processing,
        started: Instant::now(),
        history: Vec::new(),
        subscribers: Vec::new(),
        cancel: CancellationToken::new(),
      },
    );
    inner.active_by_user.insert(user.to_string(), id);
    info!(target: "session", %user, session = %id, "Session created");
    Ok(id)
  }

  /// Event stream for one session: history replay, then live events.
  pub fn subscribe(&self, id: Uuid, user: &str) -> Result<UnboundedReceiver<GenerationEvent>, SessionError> {
    let mut inner = self.inner.lock();
    let entry = inner.sessions.get_mut(&id).ok_or(SessionError::SessionNotFound)?;
    if entry.owner != user {
      warn!(target: "session", %user, session = %id, "Rejected foreign subscriber");
      return Err(SessionError::UnauthorizedSessionAccess);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    for ev in &entry.history {
      // The receiver is still in our hands, so this cannot fail.
      let _ = tx.send(ev.clone());
    }
    // A finished session drops `tx` here, closing the stream after the replay.
    if !entry.state.is_terminal() {
      entry.subscribers.push(tx);
    }
    debug!(target: "session", session = %id, replayed = entry.history.len(), "Subscriber attached");
    Ok(rx)
  }

  /// Drive `task` to completion in the background and turn its outcome into
  /// the session's terminal event. The task yields the number of questions
  /// delivered.
  pub fn run<F, Fut>(self: &Arc<Self>, id: Uuid, task: F) -> Result<JoinHandle<()>, SessionError>
  where
    F: FnOnce(SessionSink) -> Fut,
    Fut: Future<Output = Result<usize, GenerationError>> + Send + 'static,
  {
    let token = {
      let inner = self.inner.lock();
      inner.sessions.get(&id).ok_or(SessionError::SessionNotFound)?.cancel.clone()
    };
    let work = task(SessionSink { registry: Arc::clone(self), id });
    let registry = Arc::clone(self);

    Ok(tokio::spawn(async move {
      let mut handle = tokio::spawn(work);
      let outcome = tokio::select! {
        joined = &mut handle => joined.unwrap_or_else(|e| Err(GenerationError::TaskFailed(e.to_string()))),
        _ = token.cancelled() => {
          handle.abort();
          Err(GenerationError::Cancelled)
        }
      };
      registry.finish(id, outcome);
    }))
  }

  /// Request cancellation. The terminal `error` event follows from `run`.
  pub fn cancel(&self, id: Uuid, user: &str) -> Result<(), SessionError> {
    let inner = self.inner.lock();
    let entry = inner.sessions.get(&id).ok_or(SessionError::SessionNotFound)?;
    if entry.owner != user {
      return Err(SessionError::UnauthorizedSessionAccess);
    }
    if !entry.state.is_terminal() {
      info!(target: "session", session = %id, "Cancellation requested");
      entry.cancel.cancel();
    }
    Ok(())
  }

  pub fn state(&self, id: Uuid) -> Option<SessionState> {
    self.inner.lock().sessions.get(&id).map(|e| e.state)
  }

  pub fn active_session(&self, user: &str) -> Option<Uuid> {
    self.inner.lock().active_by_user.get(user).copied()
  }

  pub fn len(&self) -> usize { self.inner.lock().sessions.len() }

  /// Append a non-terminal event and fan it out. Dropped receivers are pruned.
  fn emit(&self, id: Uuid, event: GenerationEvent) {
    let mut inner = self.inner.lock();
    let Some(entry) = inner.sessions.get_mut(&id) else { return };
    if entry.state.is_terminal() {
      return;
    }
    entry.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    entry.history.push(event);
  }

  /// Terminal transition: state, terminal event, stream closure and user slot
  /// release all happen under one lock acquisition.
  fn finish(self: &Arc<Self>, id: Uuid, outcome: Result<usize, GenerationError>) {
    {
      let mut inner = self.inner.lock();
      let Some(entry) = inner.sessions.get_mut(&id) else { return };
      if entry.state.is_terminal() {
        return;
      }

      let elapsed_ms = entry.started.elapsed().as_millis() as u64;
      let (state, event) = match outcome {
        Ok(total) => {
          info!(target: "session", session = %id, total, elapsed_ms, "Generation completed");
          (
            SessionState::Completed,
            GenerationEvent::Complete { total, elapsed_ms, message: format!("Successfully generated {total} questions") },
          )
        }
        Err(e) => {
          warn!(target: "session", session = %id, kind = e.kind(), error = %e, elapsed_ms, "Generation failed");
          (SessionState::Error, GenerationEvent::Error { message: e.to_string() })
        }
      };

      entry.state = state;
      for tx in entry.subscribers.drain(..) {
        let _ = tx.send(event.clone());
      }
      entry.history.push(event);
      let owner = entry.owner.clone();
      if inner.active_by_user.get(&owner) == Some(&id) {
        inner.active_by_user.remove(&owner);
      }
    }
    self.schedule_removal(id);
  }

  fn schedule_removal(self: &Arc<Self>, id: Uuid) {
    let registry = Arc::clone(self);
    let grace = self.grace;
    tokio::spawn(async move {
      tokio::time::sleep(grace).await;
      if registry.inner.lock().sessions.remove(&id).is_some() {
        debug!(target: "session", session = %id, "Session removed");
      }
    });
  }
}

/// Write side of one session, handed to the generation task.
#[derive(Clone)]
pub struct SessionSink {
  registry: Arc<SessionRegistry>,
  id: Uuid,
}

impl SessionSink {
  pub fn id(&self) -> Uuid { self.id }

  pub fn question(&self, question: Question, progress: u8, ordinal: usize, total: usize) {
    self.registry.emit(self.id, GenerationEvent::Question { question, progress, ordinal, total });
  }
}

impl ProgressSink for SessionSink {
  fn progress(&self, percent: u8, message: String) {
    self.registry.emit(self.id, GenerationEvent::Progress { progress: percent, message });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio_test::{assert_err, assert_ok};

  fn registry() -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new(Duration::from_secs(60)))
  }

  async fn drain(mut rx: UnboundedReceiver<GenerationEvent>) -> Vec<GenerationEvent> {
    let mut out = Vec::new();
    while let Some(ev) = rx.recv().await {
      out.push(ev);
    }
    out
  }

  #[tokio::test]
  async fn single_flight_per_user() {
    let reg = registry();
    let id = assert_ok!(reg.create("u1"));
    assert_eq!(reg.create("u1"), Err(SessionError::ConcurrentGenerationConflict));
    assert_ok!(reg.create("u2"));

    let handle = reg.run(id, |_sink| async { Ok(3) }).unwrap();
    handle.await.unwrap();

    assert_eq!(reg.state(id), Some(SessionState::Completed));
    assert_eq!(reg.active_session("u1"), None);
    assert_ok!(reg.create("u1"));
  }

  #[tokio::test]
  async fn foreign_and_unknown_subscribers_are_rejected() {
    let reg = registry();
    let id = reg.create("u1").unwrap();
    assert_eq!(assert_err!(reg.subscribe(id, "u2")), SessionError::UnauthorizedSessionAccess);
    assert_eq!(assert_err!(reg.subscribe(Uuid::new_v4(), "u1")), SessionError::SessionNotFound);
    assert_eq!(reg.cancel(id, "u2"), Err(SessionError::UnauthorizedSessionAccess));
  }

  #[tokio::test]
  async fn live_subscriber_sees_events_in_order_then_closure() {
    let reg = registry();
    let id = reg.create("u1").unwrap();
    let rx = reg.subscribe(id, "u1").unwrap();

    let handle = reg
      .run(id, |sink| async move {
        sink.progress(10, "starting".into());
        sink.progress(50, "halfway".into());
        Ok(0)
      })
      .unwrap();
    handle.await.unwrap();

    let events = drain(rx).await;
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], GenerationEvent::Progress { progress: 10, .. }));
    assert!(matches!(&events[1], GenerationEvent::Progress { progress: 50, .. }));
    assert!(matches!(&events[2], GenerationEvent::Complete { total: 0, .. }));
  }

  #[tokio::test]
  async fn late_subscriber_gets_full_replay() {
    let reg = registry();
    let id = reg.create("u1").unwrap();
    reg
      .run(id, |sink| async move {
        sink.progress(20, "working".into());
        Err(GenerationError::NoQuestionsGenerated)
      })
      .unwrap()
      .await
      .unwrap();

    let events = drain(reg.subscribe(id, "u1").unwrap()).await;
    assert_eq!(events.len(), 2);
    match &events[1] {
      GenerationEvent::Error { message } => assert!(message.contains("no questions")),
      other => panic!("unexpected terminal event: {other:?}"),
    }
    assert_eq!(reg.state(id), Some(SessionState::Error));
    assert!(reg.create("u1").is_ok());
  }

  #[tokio::test]
  async fn dropped_subscriber_does_not_stop_generation() {
    let reg = registry();
    let id = reg.create("u1").unwrap();
    drop(reg.subscribe(id, "u1").unwrap());
    reg
      .run(id, |sink| async move {
        sink.progress(30, "still going".into());
        Ok(1)
      })
      .unwrap()
      .await
      .unwrap();
    assert_eq!(reg.state(id), Some(SessionState::Completed));
  }

  #[tokio::test]
  async fn cancellation_ends_with_error_event() {
    let reg = registry();
    let id = reg.create("u1").unwrap();
    let rx = reg.subscribe(id, "u1").unwrap();
    let handle = reg.run(id, |_sink| futures::future::pending::<Result<usize, GenerationError>>()).unwrap();

    assert_ok!(reg.cancel(id, "u1"));
    handle.await.unwrap();

    let events = drain(rx).await;
    assert_eq!(events, vec![GenerationEvent::Error { message: "generation was cancelled".into() }]);
    assert_eq!(reg.active_session("u1"), None);
  }

  #[tokio::test]
  async fn panicking_task_is_reported_as_error() {
    let reg = registry();
    let id = reg.create("u1").unwrap();
    reg
      .run(id, |_sink| async move {
        if true {
          panic!("boom");
        }
        Ok(0)
      })
      .unwrap()
      .await
      .unwrap();
    assert_eq!(reg.state(id), Some(SessionState::Error));
    assert_eq!(reg.active_session("u1"), None);
  }

  #[tokio::test]
  async fn finished_sessions_are_reaped_after_grace() {
    let reg = Arc::new(SessionRegistry::new(Duration::from_millis(10)));
    let id = reg.create("u1").unwrap();
    reg.run(id, |_sink| async { Ok(1) }).unwrap().await.unwrap();
    assert_eq!(reg.len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reg.len(), 0);
    assert_eq!(reg.subscribe(id, "u1").unwrap_err(), SessionError::SessionNotFound);
  }
}
