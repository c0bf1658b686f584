//! Session context for log output
//!
//! A [`SessionContext`] identifies one pipeline component instance and what
//! it does with sessions. Its [`span`](SessionContext::span) tags every event
//! inside it with the session; attach it with `Instrument::instrument` so it
//! follows the work onto whatever task runs it.

use std::fmt;

use rewind_core::SessionId;
use tracing::Span;
use uuid::Uuid;

/// What a component does with its sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Writing events (queue consumer, store writer)
    Ingest,
    /// Reading events back (player, live tail)
    Replay,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Ingest => write!(f, "ingest"),
            SessionRole::Replay => write!(f, "replay"),
        }
    }
}

/// Role and instance id of a component, stamped on its session spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    role: SessionRole,
    instance_id: Uuid,
}

impl SessionContext {
    /// Context for a new component instance
    pub fn new(role: SessionRole) -> Self {
        Self::with_instance_id(role, Uuid::new_v4())
    }

    pub fn with_instance_id(role: SessionRole, instance_id: Uuid) -> Self {
        Self { role, instance_id }
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Span carrying `session`, `role` and `instance` fields
    ///
    /// ```ignore
    /// use tracing::Instrument;
    ///
    /// let context = SessionContext::new(SessionRole::Ingest);
    /// write_batch(batch).instrument(context.span(&session_id)).await;
    /// ```
    pub fn span(&self, session_id: &SessionId) -> Span {
        tracing::info_span!(
            "session",
            session = %session_id,
            role = %self.role,
            instance = %self.instance_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::Instrument;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
            let writer = self.clone();
            tracing_subscriber::fmt()
                .json()
                .with_current_span(true)
                .with_writer(move || writer.clone())
                .finish()
        }
    }

    #[test]
    fn test_span_fields_are_rendered() {
        let captured = Captured::default();
        let context = SessionContext::new(SessionRole::Ingest);

        tracing::subscriber::with_default(captured.subscriber(), || {
            let span = context.span(&SessionId::from("S7"));
            let _entered = span.enter();
            tracing::info!("Appending batch");
        });

        let text = captured.text();
        assert!(text.contains("Appending batch"));
        assert!(text.contains(r#""session":"S7""#));
        assert!(text.contains(r#""role":"ingest""#));
        assert!(text.contains(&context.instance_id().to_string()));
    }

    #[tokio::test]
    async fn test_span_follows_spawned_task() {
        let captured = Captured::default();
        let _default = tracing::subscriber::set_default(captured.subscriber());
        let context = SessionContext::new(SessionRole::Replay);

        tokio::spawn(
            async { tracing::info!("Seeking") }.instrument(context.span(&SessionId::from("S8"))),
        )
        .await
        .unwrap();

        let text = captured.text();
        assert!(text.contains("Seeking"));
        assert!(text.contains(r#""session":"S8""#));
        assert!(text.contains(r#""role":"replay""#));
    }

    #[test]
    fn test_instance_id_is_kept() {
        let id = Uuid::new_v4();
        let context = SessionContext::with_instance_id(SessionRole::Replay, id);
        assert_eq!(context.instance_id(), id);
        assert_eq!(context.role(), SessionRole::Replay);
        assert_ne!(SessionContext::new(SessionRole::Replay).instance_id(), id);
    }
}
