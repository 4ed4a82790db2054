//! Shared fixtures for the server behaviour suites.

mod config_loader;
mod http;
mod kennel;
mod reporter;

pub use config_loader::{FailingConfigLoader, loopback_config};
pub use http::{Reply, decode_body, encode_request, post, preflight, send, send_request};
pub use kennel::{
    ADOPT_PET, AdoptPet, GHOST, Kennel, PETS_PROVIDER, Pet, SLOW_ADOPT, stream_payload,
};
pub use reporter::{HealthEvent, RecordingHealthReporter};
