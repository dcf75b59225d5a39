//! Percent-encoding for package names placed in URLs and file names.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything outside `[A-Za-z0-9._-]`.
const NAME_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'_').remove(b'-');

/// Encode a package name as one path segment: `@scope/pkg` becomes
/// `%40scope%2Fpkg`.
pub(crate) fn encode_name(raw: &str) -> String {
    utf8_percent_encode(raw, NAME_SEGMENT).to_string()
}
