//! Wire types shared by the Zerra CQRS server and client.
//!
//! A remote call travels as a single [`RequestData`] envelope posted over
//! HTTP. The envelope either names a query provider method together with its
//! positional arguments, or carries a serialized command/event for dispatch.
//! Bodies are encoded with one of three [`ContentType`] codecs and may be
//! wrapped in a framed AES-256-GCM stream when both ends share a
//! [`SymmetricKey`].
//!
//! The crate is transport agnostic: it exposes synchronous `Read`/`Write`
//! adapters so the server and client can place the cipher between the raw
//! body and the codec without buffering plaintext.
//!
//! # Example
//!
//! ```
//! use zerra_wire::{Blob, ContentType, RemoteCall, RequestData, codec};
//!
//! let argument = codec::serialize(ContentType::Json, &42_u32).expect("encode");
//! let request = RequestData::query("IPetsQueryProvider", "GetPet", vec![Blob::new(argument)], "web");
//!
//! let bytes = codec::serialize(ContentType::JsonNameless, &request).expect("encode");
//! let decoded: RequestData = codec::deserialize(ContentType::JsonNameless, &bytes).expect("decode");
//!
//! match decoded.into_call().expect("well formed") {
//!     RemoteCall::Query(call) => assert_eq!(call.method(), "GetPet"),
//!     RemoteCall::Dispatch(_) => unreachable!("query expected"),
//! }
//! ```

pub mod codec;
pub mod crypto;
pub mod envelope;
pub mod headers;
pub mod remote;

pub use self::codec::{CodecError, ContentType, ContentTypeParseError};
pub use self::crypto::{DecryptReader, EncryptWriter, KeyError, SymmetricKey};
pub use self::envelope::{
    Blob, Claim, EnvelopeError, MessageDispatch, ProviderCall, RemoteCall, RequestData,
};
pub use self::remote::RemoteError;
