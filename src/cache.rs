use std::cell::RefCell;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::{Backend, FlatTable};
use crate::errors::BackendError;

/// TTL cache around a [`Backend`], keeping the caching policy out of the
/// store. A `load_all` within `max_age` of the last fetch returns the
/// cached table; a `save_all` invalidates so the next read refetches.
///
/// Interior mutability instead of locking: the store has a single logical
/// owner (see DESIGN.md) and this wrapper follows the same model.
pub struct CachedBackend<B> {
    inner: B,
    max_age: Duration,
    last: RefCell<Option<(Instant, FlatTable)>>,
}

impl<B: Backend> CachedBackend<B> {
    pub fn new(inner: B, max_age: Duration) -> Self {
        Self {
            inner,
            max_age,
            last: RefCell::new(None),
        }
    }

    pub fn invalidate(&self) {
        self.last.borrow_mut().take();
    }
}

impl<B: Backend> Backend for CachedBackend<B> {
    fn medium(&self) -> &'static str {
        self.inner.medium()
    }

    fn load_all(&self) -> Result<FlatTable, BackendError> {
        if let Some((fetched_at, table)) = self.last.borrow().as_ref() {
            if fetched_at.elapsed() <= self.max_age {
                debug!(age_ms = fetched_at.elapsed().as_millis() as u64, "serving cached table");
                return Ok(table.clone());
            }
        }

        let table = self.inner.load_all()?;
        *self.last.borrow_mut() = Some((Instant::now(), table.clone()));
        Ok(table)
    }

    fn save_all(&self, table: &FlatTable) -> Result<(), BackendError> {
        self.inner.save_all(table)?;
        self.invalidate();
        Ok(())
    }
}
