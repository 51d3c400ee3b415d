use std::fmt;

/// A typed record of a store state transition.
///
/// Events always carry the full post-mutation snapshot of the object
/// (the pre-delete snapshot for [`WatchEvent::Deleted`]), never a diff.
/// [`WatchEvent::Error`] signals that the stream is being torn down due
/// to a local failure (cancellation, manager shutdown); it does not mean
/// a key is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    Error,
}

impl<T> WatchEvent<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            WatchEvent::Added(_) => EventKind::Added,
            WatchEvent::Modified(_) => EventKind::Modified,
            WatchEvent::Deleted(_) => EventKind::Deleted,
            WatchEvent::Error => EventKind::Error,
        }
    }

    /// The object snapshot carried by the event, if any.
    pub fn object(&self) -> Option<&T> {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                Some(obj)
            }
            WatchEvent::Error => None,
        }
    }
}

/// Discriminant of a [`WatchEvent`], used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let kind = match self {
            EventKind::Added => "added",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Error => "error",
        };
        write!(f, "{kind}")
    }
}
