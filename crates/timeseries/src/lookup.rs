//! Read-side lookups over committed data, bounded by the last block.

use crate::{ns, state, AggState, StoreError, Timeseries};
use chrono::{DateTime, Utc};

impl Timeseries {
    /// Moments default to the last committed block; anything later is denied.
    fn moment_ns(&self, moment: Option<DateTime<Utc>>) -> Result<i64, StoreError> {
        let last = self.last_block();
        match moment {
            None => Ok(last.timestamp_ns),
            Some(moment) => {
                let moment_ns = ns(moment);
                if moment_ns > last.timestamp_ns {
                    return Err(StoreError::BeyondLast);
                }
                Ok(moment_ns)
            }
        }
    }

    /// All pool identifiers staked up to a point in time.
    pub async fn pools(&self, moment: Option<DateTime<Utc>>) -> Result<Vec<String>, StoreError> {
        let ts = self.moment_ns(moment)?;
        self.store().pools_until(ts).await
    }

    /// Status label for a pool at a point in time; empty when never set.
    pub async fn pool_status(
        &self,
        pool: &str,
        moment: Option<DateTime<Utc>>,
    ) -> Result<String, StoreError> {
        let ts = self.moment_ns(moment)?;
        self.store().pool_status_until(pool, ts).await
    }

    /// All known staker addresses at a point in time.
    pub async fn stake_addrs(
        &self,
        moment: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, StoreError> {
        let ts = self.moment_ns(moment)?;
        self.store().stake_addrs_until(ts).await
    }

    /// Depth maps as committed at a specific height, straight from the
    /// persisted aggregate state.
    pub async fn depths_at(&self, height: i64) -> Result<Option<AggState>, StoreError> {
        match self.store().block_log_at(height).await? {
            None => Ok(None),
            Some(row) => {
                let state = state::decode(&row.agg_state).map_err(|source| StoreError::State {
                    height: row.height,
                    source,
                })?;
                Ok(Some(state))
            }
        }
    }
}
