mod error;
mod events;
mod ids;
mod sequence;
mod sync_status;
mod topic;
mod traits;

pub use error::{FetchError, SyncError, SyncResult, TransportError};
pub use events::{ControlMessage, Envelope, StreamEvent, WsEvent, WsRequest};
pub use ids::{ConnectionId, VenueId};
pub use sequence::{ContinuityMode, ContinuityPredicate};
pub use sync_status::SyncStatus;
pub use topic::Topic;
pub use traits::{CredentialSource, Normalizer, SessionIssuer, SnapshotProvider, Transport};
