use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use crate::error::DecodeError;

/// Separator placed between paths before encoding. Never valid inside an asset path.
pub const PATH_DELIMITER: char = ';';

/// URL-safe alphabet, no padding on output, padding tolerated on input so tokens copied
/// from older links still decode.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode an ordered list of paths into a compact transport-safe token.
///
/// The output only contains `A-Z a-z 0-9 - _`, so it can be embedded in a query string or a
/// path segment without further escaping. Identical inputs always produce identical tokens.
pub fn encode_paths<S: AsRef<str>>(paths: &[S]) -> String {
    let joined = paths
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&PATH_DELIMITER.to_string());
    TOKEN_ENGINE.encode(joined.as_bytes())
}

/// Decode a token produced by [`encode_paths`] back into its paths.
///
/// Empty segments are dropped.
pub fn decode_paths(token: &str) -> Result<Vec<String>, DecodeError> {
    let bytes = TOKEN_ENGINE.decode(token.trim())?;
    let joined = String::from_utf8(bytes)?;
    Ok(joined
        .split(PATH_DELIMITER)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect())
}
