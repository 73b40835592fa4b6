/// Returns a string representation of the specified type.
macro_rules! name_of {
    ($t:ty) => {{
        type _T = $t; // Allows $t to be recognized as a type for refactoring
        stringify!($t)
    }};
}
pub(crate) use name_of;

/// Returns an empty vector with capacity for `n` items. Allocation failure is
/// reported as [`Error::OutOfMemory`] instead of aborting.
///
/// [`Error::OutOfMemory`]: crate::Error::OutOfMemory
pub(crate) fn try_vec<T>(n: usize) -> crate::Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n).map_err(|_| crate::Error::OutOfMemory)?;
    Ok(v)
}
