//! Iteration protocol and readable streams
//!
//! A [`ValueIterator`] walks a container that exists in full when iteration
//! starts. A [`ReadableStream`] produces elements over time; readers wait
//! with a timeout and must tell an ended stream from a slow one.

use super::pattern::Pattern;
use super::Value;
use crate::error::ValueError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

// =============================================================================
// Iterators
// =============================================================================

#[derive(Debug)]
enum Source {
    Entries(Vec<(Value, Value)>),
    IntRange { start: i64, end: i64 },
    RuneRange { start: u32, end: u32 },
}

#[derive(Debug)]
struct Cursor {
    source: Source,
    /// Index of the next element
    next: usize,
    current: Option<(Value, Value)>,
}

impl Cursor {
    fn advance(&mut self) -> Option<(Value, Value)> {
        let index = self.next;
        let element = match &self.source {
            Source::Entries(entries) => entries.get(index).cloned(),
            Source::IntRange { start, end } => {
                let value = start.checked_add(i64::try_from(index).ok()?)?;
                (value <= *end).then(|| (Value::Int(index as i64), Value::Int(value)))
            }
            Source::RuneRange { start, end } => loop {
                // Surrogates are skipped, `next` keeps counting scalar candidates.
                let code = start.checked_add(u32::try_from(self.next).ok()?)?;
                if code > *end {
                    break None;
                }
                if let Some(rune) = char::from_u32(code) {
                    break Some((Value::Int(index as i64), Value::Rune(rune)));
                }
                self.next += 1;
            },
        };
        if element.is_some() {
            self.next += 1;
        }
        element
    }
}

/// Iterator over the elements of a container.
///
/// Containers are snapshotted when the iterator is created; ranges are
/// walked lazily.
#[derive(Debug)]
pub struct ValueIterator {
    cursor: Mutex<Cursor>,
    key_filter: Option<Arc<Pattern>>,
    value_filter: Option<Arc<Pattern>>,
}

impl ValueIterator {
    /// Iterator over `iterable`
    pub fn new(iterable: &Value) -> Result<Self, ValueError> {
        let source = match iterable {
            Value::List(list) => Source::Entries(indexed(list.snapshot())),
            Value::Tuple(elements) => Source::Entries(indexed(elements.to_vec())),
            Value::KeyList(keys) => Source::Entries(indexed(
                keys.iter().map(|k| Value::Str(k.clone())).collect(),
            )),
            Value::Str(s) => Source::Entries(indexed(s.chars().map(Value::Rune).collect())),
            Value::Object(object) => Source::Entries(
                object
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (Value::Str(k), v))
                    .collect(),
            ),
            Value::Record(record) => Source::Entries(
                record
                    .entries()
                    .iter()
                    .map(|(k, v)| (Value::Str(k.clone()), v.clone()))
                    .collect(),
            ),
            Value::Dictionary(dict) => Source::Entries(dict.entries()),
            Value::IntRange(range) if !range.unknown_start => Source::IntRange {
                start: range.start,
                end: range.end,
            },
            Value::RuneRange(range) => Source::RuneRange {
                start: range.start as u32,
                end: range.end as u32,
            },
            other => {
                return Err(ValueError::InvalidOperation(format!(
                    "value of type {} is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(Self::from_source(source))
    }

    /// Iterator over a list of values, keys are indices
    pub fn over_values(values: Vec<Value>) -> Self {
        Self::from_source(Source::Entries(indexed(values)))
    }

    fn from_source(source: Source) -> Self {
        Self {
            cursor: Mutex::new(Cursor {
                source,
                next: 0,
                current: None,
            }),
            key_filter: None,
            value_filter: None,
        }
    }

    /// Only yield entries whose key and value match the given patterns
    pub fn with_filters(mut self, key: Option<Arc<Pattern>>, value: Option<Arc<Pattern>>) -> Self {
        self.key_filter = key;
        self.value_filter = value;
        self
    }

    /// Move to the next matching entry, `false` once exhausted
    pub fn next(&self) -> bool {
        let mut cursor = self.cursor.lock();
        while let Some((key, value)) = cursor.advance() {
            let key_ok = self.key_filter.as_ref().map_or(true, |p| p.test(&key));
            let value_ok = self.value_filter.as_ref().map_or(true, |p| p.test(&value));
            if key_ok && value_ok {
                cursor.current = Some((key, value));
                return true;
            }
        }
        cursor.current = None;
        false
    }

    /// Key of the current entry
    pub fn key(&self) -> Result<Value, ValueError> {
        self.cursor
            .lock()
            .current
            .as_ref()
            .map(|(k, _)| k.clone())
            .ok_or_else(not_started)
    }

    /// Value of the current entry
    pub fn value(&self) -> Result<Value, ValueError> {
        self.cursor
            .lock()
            .current
            .as_ref()
            .map(|(_, v)| v.clone())
            .ok_or_else(not_started)
    }
}

fn not_started() -> ValueError {
    ValueError::InvalidOperation("iterator has no current element".to_string())
}

fn indexed(values: Vec<Value>) -> Vec<(Value, Value)> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| (Value::Int(i as i64), v))
        .collect()
}

// =============================================================================
// Streams
// =============================================================================

/// Outcome of a stream read that produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The stream is stopped and drained
    #[error("end of stream")]
    EndOfStream,
    /// Nothing arrived before the timeout, the stream may still produce
    #[error("stream wait timeout")]
    WaitTimeout,
}

/// Source of values read over time
pub trait ReadableStream: fmt::Debug + Send + Sync {
    /// Wait for the next element matching `filter` (all elements if `None`)
    fn wait_next(&self, filter: Option<&Pattern>, timeout: Duration) -> Result<Value, StreamError>;

    /// Wait for between `size.start()` and `size.end()` elements. A partial
    /// chunk is returned when the stream ends.
    fn wait_next_chunk(
        &self,
        size: RangeInclusive<usize>,
        timeout: Duration,
    ) -> Result<Vec<Value>, StreamError>;

    /// Whether the stream is stopped and drained
    fn is_stopped(&self) -> bool;
}

/// In-memory stream fed through a channel
#[derive(Debug)]
pub struct ElementStream {
    receiver: Option<Receiver<Value>>,
    pending: Mutex<VecDeque<Value>>,
}

impl ElementStream {
    /// Create a stream and the sender feeding it; dropping every sender stops the stream
    pub fn channel() -> (Sender<Value>, ElementStream) {
        let (sender, receiver) = channel::unbounded();
        let stream = ElementStream {
            receiver: Some(receiver),
            pending: Mutex::new(VecDeque::new()),
        };
        (sender, stream)
    }

    /// Stopped stream producing `values`
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            receiver: None,
            pending: Mutex::new(values.into()),
        }
    }

    fn recv(&self, deadline: Instant) -> Result<Value, StreamError> {
        if let Some(value) = self.pending.lock().pop_front() {
            return Ok(value);
        }
        let Some(receiver) = &self.receiver else {
            return Err(StreamError::EndOfStream);
        };
        let timeout = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(StreamError::WaitTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(StreamError::EndOfStream),
        }
    }
}

impl ReadableStream for ElementStream {
    fn wait_next(&self, filter: Option<&Pattern>, timeout: Duration) -> Result<Value, StreamError> {
        let deadline = Instant::now() + timeout;
        loop {
            let value = self.recv(deadline)?;
            if filter.map_or(true, |p| p.test(&value)) {
                return Ok(value);
            }
        }
    }

    fn wait_next_chunk(
        &self,
        size: RangeInclusive<usize>,
        timeout: Duration,
    ) -> Result<Vec<Value>, StreamError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = Vec::with_capacity(*size.end());
        while chunk.len() < *size.end() {
            match self.recv(deadline) {
                Ok(value) => chunk.push(value),
                Err(StreamError::EndOfStream) if chunk.is_empty() => {
                    return Err(StreamError::EndOfStream)
                }
                Err(StreamError::EndOfStream) => return Ok(chunk),
                Err(StreamError::WaitTimeout) => {
                    if !chunk.is_empty() && chunk.len() >= *size.start() {
                        return Ok(chunk);
                    }
                    // Not enough elements: keep them for the next read.
                    let mut pending = self.pending.lock();
                    for value in chunk.into_iter().rev() {
                        pending.push_front(value);
                    }
                    return Err(StreamError::WaitTimeout);
                }
            }
        }
        Ok(chunk)
    }

    fn is_stopped(&self) -> bool {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            return false;
        }
        match &self.receiver {
            None => true,
            Some(receiver) => match receiver.try_recv() {
                Ok(value) => {
                    pending.push_back(value);
                    false
                }
                Err(TryRecvError::Empty) => false,
                Err(TryRecvError::Disconnected) => true,
            },
        }
    }
}

/// Stream yielding only the elements of another stream that match a pattern
#[derive(Debug)]
pub struct FilteredStream {
    inner: Arc<dyn ReadableStream>,
    filter: Arc<Pattern>,
}

impl FilteredStream {
    pub fn new(inner: Arc<dyn ReadableStream>, filter: Arc<Pattern>) -> Self {
        Self { inner, filter }
    }
}

impl ReadableStream for FilteredStream {
    fn wait_next(&self, filter: Option<&Pattern>, timeout: Duration) -> Result<Value, StreamError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let value = self.inner.wait_next(Some(&self.filter), remaining)?;
            if filter.map_or(true, |p| p.test(&value)) {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(StreamError::WaitTimeout);
            }
        }
    }

    fn wait_next_chunk(
        &self,
        size: RangeInclusive<usize>,
        timeout: Duration,
    ) -> Result<Vec<Value>, StreamError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = Vec::with_capacity(*size.end());
        while chunk.len() < *size.end() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inner.wait_next(Some(&self.filter), remaining) {
                Ok(value) => chunk.push(value),
                Err(err) if chunk.is_empty() => return Err(err),
                Err(_) => break,
            }
        }
        Ok(chunk)
    }

    fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{IntRange, TypePattern};
    use std::thread;

    #[test]
    fn test_list_iteration() {
        let iterator = ValueIterator::new(&Value::list(vec![Value::str("a"), Value::str("b")])).unwrap();
        assert!(iterator.next());
        assert_eq!(iterator.key().unwrap(), Value::Int(0));
        assert_eq!(iterator.value().unwrap(), Value::str("a"));
        assert!(iterator.next());
        assert!(!iterator.next());
        assert!(iterator.value().is_err());
    }

    #[test]
    fn test_range_iteration_is_lazy() {
        let iterator = ValueIterator::new(&Value::IntRange(IntRange::new(5, i64::MAX))).unwrap();
        assert!(iterator.next());
        assert!(iterator.next());
        assert_eq!(iterator.value().unwrap(), Value::Int(6));
        assert!(ValueIterator::new(&Value::IntRange(IntRange::upper_bound(3))).is_err());
    }

    #[test]
    fn test_object_iteration_with_value_filter() {
        let object = Value::object(vec![("a", Value::Int(1)), ("b", Value::str("x"))]);
        let int = Arc::new(Pattern::Type(TypePattern::builtin("int").unwrap()));
        let iterator = ValueIterator::new(&object).unwrap().with_filters(None, Some(int));

        assert!(iterator.next());
        assert_eq!(iterator.key().unwrap(), Value::str("a"));
        assert!(!iterator.next());
    }

    #[test]
    fn test_stream_end_and_timeout_are_distinct() {
        let (sender, stream) = ElementStream::channel();
        assert_eq!(
            stream.wait_next(None, Duration::from_millis(5)),
            Err(StreamError::WaitTimeout)
        );

        sender.send(Value::Int(1)).unwrap();
        assert_eq!(stream.wait_next(None, Duration::from_millis(5)), Ok(Value::Int(1)));

        drop(sender);
        assert_eq!(
            stream.wait_next(None, Duration::from_millis(5)),
            Err(StreamError::EndOfStream)
        );
        assert!(stream.is_stopped());
    }

    #[test]
    fn test_filtered_stream_skips_non_matching_elements() {
        let inner = ElementStream::from_values(vec![Value::str("a"), Value::Int(1), Value::Int(2)]);
        let int = Arc::new(Pattern::Type(TypePattern::builtin("int").unwrap()));
        let stream = FilteredStream::new(Arc::new(inner), int);

        assert_eq!(stream.wait_next(None, Duration::from_millis(5)), Ok(Value::Int(1)));
        assert_eq!(
            stream.wait_next_chunk(2..=10, Duration::from_millis(5)),
            Ok(vec![Value::Int(2)])
        );
        assert!(stream.is_stopped());
    }

    #[test]
    fn test_stream_from_values() {
        let stream = ElementStream::from_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            stream.wait_next_chunk(1..=2, Duration::from_millis(5)),
            Ok(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            stream.wait_next_chunk(1..=2, Duration::from_millis(5)),
            Ok(vec![Value::Int(3)])
        );
        assert_eq!(
            stream.wait_next_chunk(1..=2, Duration::from_millis(5)),
            Err(StreamError::EndOfStream)
        );
    }

    #[test]
    fn test_chunk_timeout_keeps_partial_elements() {
        let (sender, stream) = ElementStream::channel();
        sender.send(Value::Int(1)).unwrap();
        assert_eq!(
            stream.wait_next_chunk(2..=2, Duration::from_millis(5)),
            Err(StreamError::WaitTimeout)
        );

        let producer = thread::spawn(move || {
            sender.send(Value::Int(2)).unwrap();
        });
        producer.join().unwrap();
        assert_eq!(
            stream.wait_next_chunk(2..=2, Duration::from_millis(50)),
            Ok(vec![Value::Int(1), Value::Int(2)])
        );
    }
}
