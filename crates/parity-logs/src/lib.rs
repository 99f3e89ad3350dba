//! Log grammars and normalization for backend captures.
//!
//! Both backends print the handler's output framed by platform-specific
//! noise. [`CompletionDetector`] finds the span that belongs to one request
//! and decides whether it is finished; [`LogNormalizer`] removes the tokens
//! that can never match across platforms (timestamps, request ids, image-pull
//! preludes) so the remaining text can be compared byte for byte.

mod completion;
mod normalize;
mod tokens;

pub use completion::{
    detect_completion, CompletionDetector, CompletionError, CompletionGrammar, CompletionScan,
    LineKind,
};
pub use normalize::{strip_image_prelude, LogNormalizer, NormalizeError};
pub use tokens::{is_hex_request_id, is_uuid};
