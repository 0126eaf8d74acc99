//! Input loading.

use super::types::InputError;
use std::path::Path;

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Read `path` as UTF-8 text, dropping a leading byte-order mark.
pub async fn read_input(path: &Path) -> Result<String, InputError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let text = String::from_utf8(bytes).map_err(|_| InputError::NotUtf8 {
        path: path.to_path_buf(),
    })?;
    Ok(match text.strip_prefix(BYTE_ORDER_MARK) {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}
