//! Client side of the presence service: polls the status endpoint and turns
//! the stored snapshot into display text.

pub mod poller;
pub mod source;
pub mod view;

pub use poller::{
    poll_once, resolve_endpoint, PollUpdate, PollerConfig, PollerHandle, PresencePoller,
    DEFAULT_ENDPOINT, DEFAULT_POLL_MS, MIN_POLL_MS,
};
pub use source::{HttpStatusSource, StatusSource, WatchError};
pub use view::{render_card, PresenceView};
