//! Events emitted by the playback engine.
//!
//! The engine publishes these over a channel so the application loop can
//! react without reaching into engine internals. The main loop uses
//! [`TrackEnded`](Event::TrackEnded) to advance the backend to the next
//! track; the rest are informational.

/// Significant state changes in local playback or provider connectivity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Local playback has started or resumed.
    Play,

    /// Local playback has paused.
    Pause,

    /// A crossfade to a new source has begun.
    TrackChanged,

    /// The active source played to its natural end.
    ///
    /// The backend owns the station logic, so this is a request to skip
    /// forward, not an automatic advance.
    TrackEnded,

    /// The external provider became ready to accept commands.
    Connected,

    /// The external provider was disconnected.
    Disconnected,
}
