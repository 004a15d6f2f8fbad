//! Message payload codecs.
//!
//! Everything that turns message content plus metadata into chunk bodies and
//! back. None of it depends on the stream machinery.
//!
//! | Module        | Content-Type                      | Used when                               |
//! |---------------|-----------------------------------|-----------------------------------------|
//! | `cpim`        | `message/cpim`                    | Metadata must travel, or CPIM preferred |
//! | `simple`      | the content's own type            | Default sender/recipient, raw accepted  |
//! | `composing`   | `application/im-iscomposing+xml`  | Typing notifications                    |
//!
//! `identity`, `mime` and `text` hold the shared value types.

pub mod composing;
pub mod cpim;
pub mod identity;
pub mod mime;
pub mod simple;
pub mod text;

pub use composing::{ComposingParseError, ComposingState, IsComposingDocument, COMPOSING_CONTENT_TYPE, DEFAULT_REFRESH};
pub use cpim::{CpimHeader, CpimNamespace, CpimParseError, CpimPayload, CPIM_CONTENT_TYPE, STANDARD_NAMESPACE};
pub use identity::{ChatIdentity, SipUri};
pub use mime::{contains_mime_type, decode_charset, ContentType};
pub use simple::SimplePayload;
pub use text::{format_timestamp, now, parse_timestamp, MultilingualText, Timestamp};
