use crate::prelude::*;

/// Hides a value (usually a secret) from `Debug` output
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DebugShim<T>(pub T);

impl<T> fmt::Debug for DebugShim<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T> From<T> for DebugShim<T> {
    fn from(val: T) -> Self { Self(val) }
}

/// Split `text` into pieces of at most `limit` characters
///
/// Pieces break after a newline where possible.  Empty input yields no
/// pieces.
pub fn split_message(text: &str, limit: usize) -> Vec<&str> {
    assert!(limit > 0, "Message limit must be nonzero");

    let mut pieces = vec![];
    let mut rest = text;

    while let Some((hard, _)) = rest.char_indices().nth(limit) {
        let cut = rest[..hard].rfind('\n').map_or(hard, |i| i + 1);
        let (piece, tail) = rest.split_at(cut);
        pieces.push(piece);
        rest = tail;
    }

    if !rest.is_empty() {
        pieces.push(rest);
    }

    pieces
}
