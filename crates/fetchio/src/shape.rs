// Ordered shape probe for duck-typed upstream JSON.
//
// Several backends answer the same endpoint with one of two response
// shapes depending on server version. Decoding is an explicit ordered
// attempt: try the preferred shape (with an acceptance check, since a
// permissive shape can decode vacuously), then the legacy shape, and fail
// only if neither matches.

use serde::de::DeserializeOwned;

#[derive(Debug)]
pub enum Shape<A, B> {
    First(A),
    Second(B),
}

/// Decode `raw` as shape `A` if it parses and `accept_first` holds,
/// otherwise as shape `B`. The returned error is the second shape's parse
/// error.
pub fn probe_json<A, B>(
    raw: &[u8],
    accept_first: impl Fn(&A) -> bool,
) -> Result<Shape<A, B>, serde_json::Error>
where
    A: DeserializeOwned,
    B: DeserializeOwned,
{
    if let Ok(first) = serde_json::from_slice::<A>(raw)
        && accept_first(&first)
    {
        return Ok(Shape::First(first));
    }
    serde_json::from_slice::<B>(raw).map(Shape::Second)
}
