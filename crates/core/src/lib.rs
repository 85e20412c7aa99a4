//! Domain types and pure logic for pushing custom hostnames to the DNS and
//! hosting providers. Nothing in this crate performs I/O.

pub mod hostname;
pub mod machine;
pub mod retry;
pub mod status;
pub mod types;

pub use hostname::{is_apex, normalize_hostname, HostnameError};
pub use machine::{PushEvent, PushLimits, Step, Transition, TransitionError};
pub use retry::RetryPolicy;
pub use status::{PushOutcome, PushStatusReport};
pub use types::{Domain, ProviderRefs, PushState, PushStatus, Site, VerificationState};
