//! Server-driven paging with resumable continuation tokens.
//!
//! A [`Paginator`] walks `Initial -> Paging -> Exhausted`. Each page
//! overfetches one record to learn whether more data follows; only then is
//! a `$skiptoken` issued. Tokens carry the consumed offset (relative to
//! `$skip`), the remaining `$top` budget and a fingerprint of filter and
//! order, so a token replayed against a different query is rejected.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::Entity;
use crate::entity_set::EntitySet;
use crate::error::{Error, Result};
use crate::eval::QueryPlan;

const TOKEN_VERSION: u8 = 1;

/// Decoded `$skiptoken` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipToken {
    pub v: u8,
    /// Records consumed past `$skip`.
    pub o: u64,
    /// Remaining `$top` budget.
    pub r: Option<u64>,
    /// Filter/order fingerprint.
    pub h: String,
}

impl SkipToken {
    #[must_use]
    pub fn new(offset: u64, remaining: Option<u64>, fingerprint: String) -> Self {
        Self {
            v: TOKEN_VERSION,
            o: offset,
            r: remaining,
            h: fingerprint,
        }
    }

    /// # Errors
    /// Serialization failures.
    pub fn encode(&self) -> serde_json::Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    /// # Errors
    /// Returns `Error::BadRequest` with code `invalid_skiptoken` for bad
    /// base64, bad JSON or an unknown version.
    pub fn decode(text: &str) -> Result<Self> {
        let invalid = |why: String| {
            Error::bad_request("invalid_skiptoken", format!("invalid $skiptoken: {why}"))
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|e| invalid(e.to_string()))?;
        let token: SkipToken = serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;
        if token.v != TOKEN_VERSION {
            return Err(invalid(format!("unsupported version {}", token.v)));
        }
        Ok(token)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagerState {
    Initial,
    Paging { offset: u64, remaining: Option<u64> },
    Exhausted,
}

#[derive(Debug, Default)]
pub struct Page {
    pub entities: Vec<Entity>,
    /// Total matches before `$skip`/`$top`, when `$count=true`.
    pub count: Option<u64>,
    pub skiptoken: Option<String>,
}

/// Page-by-page reader over an entity set.
#[derive(Debug)]
pub struct Paginator<'s> {
    set: &'s EntitySet,
    plan: QueryPlan,
    fingerprint: String,
    state: PagerState,
    start: (u64, Option<u64>),
    skip: u64,
    page_size: u64,
}

impl<'s> Paginator<'s> {
    /// Bind the set's options and validate any `$skiptoken`.
    ///
    /// # Errors
    /// `BadRequest` for invalid options, invalid tokens, or a token issued
    /// for a different filter or order.
    pub fn new(set: &'s EntitySet) -> Result<Self> {
        let plan = set.plan()?;
        let fingerprint = plan.fingerprint();
        let options = &set.transaction().options;
        let skip = options.skip.unwrap_or(0);

        let start = match &options.skiptoken {
            Some(text) => {
                let token = SkipToken::decode(text)?;
                if token.h != fingerprint {
                    return Err(Error::bad_request(
                        "skiptoken_mismatch",
                        "$skiptoken was issued for a different $filter or $orderby",
                    ));
                }
                (skip.saturating_add(token.o), token.r)
            }
            None => (skip, options.top),
        };

        let pagination = &set.context().config.pagination;
        let page_size = options
            .top
            .or(pagination.default_page_size)
            .unwrap_or(pagination.max_page_size)
            .min(pagination.max_page_size)
            .max(1);

        Ok(Self {
            set,
            plan,
            fingerprint,
            state: PagerState::Initial,
            start,
            skip,
            page_size,
        })
    }

    #[must_use]
    pub fn state(&self) -> PagerState {
        self.state
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Produce the next page; `None` once exhausted. The first call always
    /// yields a page, possibly empty.
    ///
    /// # Errors
    /// Propagates driver and expansion failures.
    pub fn next_page(&mut self) -> Result<Option<Page>> {
        let (offset, remaining, count) = match self.state {
            PagerState::Initial => {
                let count = if self.set.transaction().options.count {
                    Some(self.set.count_plan(&self.plan)?)
                } else {
                    None
                };
                (self.start.0, self.start.1, count)
            }
            PagerState::Paging { offset, remaining } => (offset, remaining, None),
            PagerState::Exhausted => return Ok(None),
        };

        let take = remaining.map_or(self.page_size, |r| r.min(self.page_size));
        let mut records = Vec::new();
        if take > 0 {
            let mut stream = self.set.stream(self.plan.clone(), offset, Some(take + 1))?;
            while let Some(record) = stream.next_record()? {
                records.push(record);
            }
        }
        let more_data = u64::try_from(records.len()).unwrap_or(u64::MAX) > take;
        if more_data {
            records.pop();
        }
        let produced = u64::try_from(records.len()).unwrap_or(u64::MAX);
        let consumed = offset + produced;
        let remaining = remaining.map(|r| r.saturating_sub(produced));
        let budget_left = remaining.is_none_or(|r| r > 0);

        let skiptoken = if more_data && budget_left {
            self.state = PagerState::Paging {
                offset: consumed,
                remaining,
            };
            let token = SkipToken::new(consumed - self.skip, remaining, self.fingerprint.clone());
            Some(token.encode().map_err(Error::driver)?)
        } else {
            self.state = PagerState::Exhausted;
            None
        };
        debug!(
            set = %self.set.name(),
            offset,
            produced,
            state = ?self.state,
            "page produced"
        );

        let select = self.plan.select.as_deref();
        let entities = records
            .into_iter()
            .map(|record| self.set.materialize(record, select))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Page {
            entities,
            count,
            skiptoken,
        }))
    }
}
