//! Query identities for pull requests.
//!
//! A [`QueryRequest`] pairs a textual identity with an optional predicate.
//! The identity is the deduplication key for pending pulls: two requests
//! with equal ids are the same request, whatever their predicates.
//! Combining requests with [`QueryRequest::or`] / [`QueryRequest::and`]
//! derives a deterministic id from the operand ids.

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

/// Identity of the unconstrained "match everything" request.
pub const ALL_QUERY_ID: &str = "all";

/// Shared record predicate.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

pub struct QueryRequest<T> {
    id: String,
    predicate: Option<Predicate<T>>,
}

impl<T> QueryRequest<T> {
    /// The unconstrained request, identity `"all"`.
    pub fn all() -> Self {
        Self {
            id: ALL_QUERY_ID.to_string(),
            predicate: None,
        }
    }

    pub fn new(id: impl Into<String>, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            id: id.into(),
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn from_parts(id: impl Into<String>, predicate: Option<Predicate<T>>) -> Self {
        Self {
            id: id.into(),
            predicate,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// True when `record` passes the predicate. Requests without a
    /// predicate match everything.
    pub fn matches(&self, record: &T) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(record))
    }

    pub fn is_duplicate_of(&self, other: &QueryRequest<T>) -> bool {
        self.id == other.id
    }
}

impl<T: 'static> QueryRequest<T> {
    /// Combine with OR. Only operands with a predicate contribute; with
    /// neither, the result is [`QueryRequest::all`].
    pub fn or(&self, other: &QueryRequest<T>) -> QueryRequest<T> {
        combine(self, other, "OR", |a, b| {
            let joined: Predicate<T> = Arc::new(move |record: &T| a(record) || b(record));
            joined
        })
    }

    /// Combine with AND, following the same rules as [`QueryRequest::or`].
    pub fn and(&self, other: &QueryRequest<T>) -> QueryRequest<T> {
        combine(self, other, "AND", |a, b| {
            let joined: Predicate<T> = Arc::new(move |record: &T| a(record) && b(record));
            joined
        })
    }
}

fn combine<T>(
    a: &QueryRequest<T>,
    b: &QueryRequest<T>,
    op: &str,
    join: impl FnOnce(Predicate<T>, Predicate<T>) -> Predicate<T>,
) -> QueryRequest<T> {
    match (&a.predicate, &b.predicate) {
        (Some(pa), Some(pb)) => QueryRequest {
            id: format!("({}){op}({})", a.id, b.id),
            predicate: Some(join(Arc::clone(pa), Arc::clone(pb))),
        },
        (Some(_), None) => a.clone(),
        (None, Some(_)) => b.clone(),
        (None, None) => QueryRequest::all(),
    }
}

impl<T> Clone for QueryRequest<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<T> Default for QueryRequest<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T> PartialEq for QueryRequest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for QueryRequest<T> {}

impl<T> fmt::Debug for QueryRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRequest")
            .field("id", &self.id)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

impl<T> fmt::Display for QueryRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let predicate = if self.predicate.is_some() { "predicate" } else { "none" };
        write!(f, "[{}][{}]", self.id, predicate)
    }
}

impl<T: 'static> BitOr for QueryRequest<T> {
    type Output = QueryRequest<T>;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.or(&rhs)
    }
}

impl<T: 'static> BitAnd for QueryRequest<T> {
    type Output = QueryRequest<T>;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(&rhs)
    }
}
