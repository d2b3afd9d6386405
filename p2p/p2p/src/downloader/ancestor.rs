use cinder_types::{Header, SyncMode};

use crate::constants::ANCESTOR_SPAN_LEN;

use super::{SyncAttempt, SyncError};

impl SyncAttempt {
    /// Finds the highest block our canonical chain shares with the sync peer's.
    ///
    /// The [`ANCESTOR_SPAN_LEN`] headers below the lower of the two heads are fetched in one
    /// request, which finds the ancestor when the chains only diverged recently. Otherwise the
    /// ancestor is binary searched for between that span and the deepest allowed rollback.
    ///
    /// # Errors
    /// Returns [`SyncError::ReorgTooDeep`] if the chains diverged below the deepest allowed
    /// rollback.
    pub(super) async fn find_common_ancestor(&self) -> Result<Header, SyncError> {
        let local = self.chain.head()?;
        let top = local.number.min(self.target.head.number);
        let span_start = top.saturating_sub(ANCESTOR_SPAN_LEN - 1);

        let span = self
            .fetch_header_range(span_start, top - span_start + 1)
            .await?;
        self.made_progress();

        for header in span.iter().rev() {
            if self.is_shared(header)? {
                return Ok(header.clone());
            }
        }

        let floor = local.number.saturating_sub(self.config.max_reorg_depth);
        if floor >= span_start {
            return Err(SyncError::ReorgTooDeep);
        }

        let mut shared = self.fetch_single_header(floor).await?;
        if !self.is_shared(&shared)? {
            return Err(SyncError::ReorgTooDeep);
        }

        // `shared` is on both chains, `unshared` is not.
        let mut unshared = span_start;
        while shared.number + 1 < unshared {
            let mid = shared.number + (unshared - shared.number) / 2;
            let header = self.fetch_single_header(mid).await?;
            self.made_progress();

            if self.is_shared(&header)? {
                shared = header;
            } else {
                unshared = mid;
            }
        }

        Ok(shared)
    }

    async fn fetch_single_header(&self, number: u64) -> Result<Header, SyncError> {
        self.fetch_header_range(number, 1)
            .await?
            .pop()
            .ok_or(SyncError::WrongResponse)
    }

    /// Returns `true` if `header` is on our canonical chain and we can build on it.
    fn is_shared(&self, header: &Header) -> Result<bool, SyncError> {
        if self.chain.canonical_hash(header.number)? != Some(header.hash()) {
            return Ok(false);
        }

        Ok(match self.config.mode {
            SyncMode::Light => true,
            SyncMode::Full | SyncMode::Fast => header.number <= self.chain.head_block()?.number,
        })
    }
}
