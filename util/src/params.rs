//! Pagination and ordering parameters for list queries.
//!
//! The wire grammar for an ordering is a comma separated list of
//! `[+-]?key` tokens, where `+` sorts ascending, `-` descending, and a
//! missing prefix defaults to ascending. `OrderBy::to_string` emits the
//! explicit form and is the exact inverse of [`OrderBy::from_string`].

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    #[error("offset of {0} is invalid, offsets cannot be negative")]
    NegativeOffset(i64),
    #[error("limit of {0} is invalid, use -1 to list all items")]
    InvalidLimit(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

/// A single ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub key: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Desc,
        }
    }
}

impl Display for Order {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let prefix = match self.direction {
            Direction::Asc => '+',
            Direction::Desc => '-',
        };
        write!(f, "{}{}", prefix, self.key)
    }
}

/// An ordered sequence of ordering clauses, most significant first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderBy(Vec<Order>);

impl OrderBy {
    pub fn new(orders: Vec<Order>) -> Self {
        Self(orders)
    }

    /// Parses the `[+-]?key` comma grammar. Empty tokens are skipped and
    /// unknown prefixes default to ascending; this never fails.
    pub fn from_string(s: &str) -> Self {
        let orders = s
            .split(',')
            .map(str::trim)
            .filter_map(|token| {
                let (direction, key) = match token.strip_prefix('+') {
                    Some(rest) => (Direction::Asc, rest),
                    None => match token.strip_prefix('-') {
                        Some(rest) => (Direction::Desc, rest),
                        None => (Direction::Asc, token),
                    },
                };
                if key.is_empty() {
                    None
                } else {
                    Some(Order {
                        key: key.to_owned(),
                        direction,
                    })
                }
            })
            .collect();
        Self(orders)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.0.iter()
    }
}

impl FromStr for OrderBy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_string(s))
    }
}

impl Display for OrderBy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for order in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}", order)?;
        }
        Ok(())
    }
}

/// Pagination, filtering and ordering for a list query.
///
/// `limit == -1` together with `offset == 0` is the sentinel for "list
/// everything"; any other negative limit is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub filter: Vec<String>,
    pub order_by: OrderBy,
    pub offset: i64,
    pub limit: i64,
}

impl Default for List {
    fn default() -> Self {
        Self::list_all()
    }
}

impl List {
    /// Parameters selecting an entire collection.
    pub fn list_all() -> Self {
        Self {
            filter: Vec::new(),
            order_by: OrderBy::default(),
            offset: 0,
            limit: -1,
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.offset < 0 {
            return Err(ParamsError::NegativeOffset(self.offset));
        }
        if self.limit < -1 {
            return Err(ParamsError::InvalidLimit(self.limit));
        }
        Ok(())
    }

    /// True iff these parameters select everything.
    pub fn is_all(&self) -> bool {
        self.limit == -1 && self.offset == 0
    }

    pub fn with_filters<I, S>(&self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.filter = filters.into_iter().map(Into::into).collect();
        next
    }

    pub fn with_order_by(&self, order_by: OrderBy) -> Self {
        let mut next = self.clone();
        next.order_by = order_by;
        next
    }

    pub fn with_offset_limit(&self, offset: i64, limit: i64) -> Self {
        let mut next = self.clone();
        next.offset = offset;
        next.limit = limit;
        next
    }
}
