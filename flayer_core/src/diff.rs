use std::collections::HashSet;
use std::hash::Hash;

/// Returns the elements of `b` that have no equal element in `a`.
///
/// Order follows `b` and duplicates in `b` are kept. Equality is the full
/// value equality of the element type; for errors that means every field and
/// every frame, never just the unique id.
pub fn diff<T>(a: &[T], b: &[T]) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let seen: HashSet<&T> = a.iter().collect();
    b.iter().filter(|item| !seen.contains(item)).cloned().collect()
}
