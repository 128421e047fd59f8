//! Splitting of property lists into request-sized groups.
//!
//! The CRM API rejects requests whose `properties` query value grows past a
//! fixed size, while objects may carry thousands of custom properties. Each
//! group yielded here is small enough to be sent as one comma-joined value.

/// Upper bound on the comma-joined `properties` value of a single request.
pub const PROPERTIES_PARAM_MAX_LENGTH: usize = 15_000;

const SEPARATOR_LEN: usize = 1;

/// Greedily split `properties` into groups whose comma-joined length stays
/// within `max_len`.
///
/// A single name longer than `max_len` is never split; it gets a group of its
/// own.
pub fn split_properties<I>(properties: I, max_len: usize) -> PropertyChunks<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    PropertyChunks {
        inner: properties.into_iter().peekable(),
        max_len,
    }
}

/// Lazy iterator returned by [`split_properties`].
pub struct PropertyChunks<I: Iterator> {
    inner: std::iter::Peekable<I>,
    max_len: usize,
}

impl<I> Iterator for PropertyChunks<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.inner.next()?;
        let mut joined_len = first.as_ref().len();
        let mut chunk = vec![first.as_ref().to_string()];

        while let Some(candidate) = self.inner.peek() {
            let grown = joined_len + SEPARATOR_LEN + candidate.as_ref().len();
            if grown > self.max_len {
                break;
            }
            joined_len = grown;
            if let Some(name) = self.inner.next() {
                chunk.push(name.as_ref().to_string());
            }
        }

        Some(chunk)
    }
}

/// Length of `names` once joined with the separator used on the wire.
pub fn joined_len<S: AsRef<str>>(names: &[S]) -> usize {
    let chars: usize = names.iter().map(|n| n.as_ref().len()).sum();
    chars + names.len().saturating_sub(1) * SEPARATOR_LEN
}
